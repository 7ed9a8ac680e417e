//! Host integration tests for the gateway.
//!
//! Everything runs against recording mock ports — no radio, no shell
//! tools, no wall clock.  The files mirror the layering: device session,
//! coordinator, dispatcher.

// The embassy-sync primitives need a critical-section implementation on
// the host; the dev-dependency provides one.
use critical_section as _;


mod device_tests;
mod dispatcher_tests;
