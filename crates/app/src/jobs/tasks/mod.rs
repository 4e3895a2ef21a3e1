pub mod poll_cycle;
