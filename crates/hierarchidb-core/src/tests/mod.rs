//! Scenario and property suites over the whole engine. Each case builds a
//! fresh context; nothing here reaches into module internals beyond the
//! crate-private test accessors.

mod properties;
mod scenarios;
