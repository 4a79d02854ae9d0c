mod activity_completed;

pub use activity_completed::ActivityCompleted;
