pub mod cycle_delay;
