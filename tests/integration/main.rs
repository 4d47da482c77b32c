// Each file under tests/integration is a module of one test binary.

mod support;

mod client_test;
mod connection_test;
