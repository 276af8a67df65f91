mod test_helpers;

mod cleaning_tests;
mod config_tests;
