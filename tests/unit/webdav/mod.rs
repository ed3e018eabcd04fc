mod client_tests;
mod status_tests;
