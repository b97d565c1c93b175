//! Test suites for database preparation and the historian fixture.

mod support;
mod unit;
