// Test modules for PortUP
// Each module holds the tests for the corresponding source module

mod lifecycle_tests;
mod support;
