mod run;
mod scenario;
mod workloads;
