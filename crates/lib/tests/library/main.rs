mod common;
mod facade_tests;
mod include_tests;
