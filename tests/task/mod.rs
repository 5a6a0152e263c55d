//! Task coordinator tests.

mod coordinator_test;
