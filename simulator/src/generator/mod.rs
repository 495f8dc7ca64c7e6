pub mod three_phase;
