//! Logging facilities.
//!
//! Component messages are prefixed with the simulation time, the level and the component name:
//!
//! ```text
//! [12.500 INFO  resource_0] gridlet 3 of user_1 finished
//! ```

use atty::Stream;
use colored::{Color, ColoredString, Colorize};
use serde_json::json;
use serde_type_name::type_name;

use crate::event::Event;

#[doc(hidden)]
pub use ::log as facade;

/// Applies the color to the string if stderr (log) goes to console.
pub fn get_colored(s: &str, color: Color) -> ColoredString {
    if atty::is(Stream::Stderr) {
        s.color(color)
    } else {
        s.normal()
    }
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_ctx {
    ($level:ident, $label:expr, $color:ident, $ctx:expr, $($arg:tt)+) => (
        $crate::log::facade::$level!(
            target: $ctx.name(),
            "[{:.3} {} {}] {}",
            $ctx.time(),
            $crate::log::get_colored($label, $crate::colored::Color::$color),
            $ctx.name(),
            format_args!($($arg)+)
        )
    );
}

/// Logs a message at the info level on behalf of a component.
///
/// The first argument is anything exposing `name()` and `time()`, usually a
/// [`SimulationContext`](crate::SimulationContext). The rest is a format string with arguments.
///
/// # Examples
///
/// ```rust
/// use gridsim_core::{log_info, Simulation, SimulationContext};
///
/// struct Broker {
///     ctx: SimulationContext,
/// }
///
/// impl Broker {
///     fn start(&self, jobs: usize) {
///         log_info!(self.ctx, "submitting {} jobs", jobs);
///     }
/// }
///
/// let mut sim = Simulation::new(123);
/// let broker = Broker { ctx: sim.create_context("broker") };
/// broker.start(10);
/// ```
#[macro_export]
macro_rules! log_info {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(info, "INFO ", Green, $ctx, $($arg)+));
}

/// Logs a message at the debug level on behalf of a component.
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_debug {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(debug, "DEBUG", Blue, $ctx, $($arg)+));
}

/// Logs a message at the trace level on behalf of a component.
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_trace {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(trace, "TRACE", Cyan, $ctx, $($arg)+));
}

/// Logs a message at the warn level on behalf of a component.
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_warn {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(warn, "WARN ", Yellow, $ctx, $($arg)+));
}

/// Logs a message at the error level on behalf of a component.
///
/// See [`log_info!`](crate::log_info!).
#[macro_export]
macro_rules! log_error {
    ($ctx:expr, $($arg:tt)+) => ($crate::__log_with_ctx!(error, "ERROR", Red, $ctx, $($arg)+));
}

fn describe(event: &Event) -> serde_json::Value {
    json!({
        "type": type_name(&event.data).unwrap_or("unknown"),
        "data": event.data,
        "src": event.src,
        "dst": event.dst,
    })
}

fn log_simulation_error(event: &Event, what: &str) {
    ::log::error!(
        target: "simulation",
        "[{:.3} {} simulation] {}: {}",
        event.time,
        get_colored("ERROR", Color::Red),
        what,
        describe(event)
    );
}

/// Logs an event whose payload was not matched by any arm of [`cast!`](crate::cast!).
pub fn log_unhandled_event(event: Event) {
    log_simulation_error(&event, "Unhandled event");
}

/// Logs an event destined to a component without registered handler.
pub(crate) fn log_undelivered_event(event: Event) {
    log_simulation_error(&event, "Undelivered event");
}

/// Logs an event rejected by the simulation.
pub(crate) fn log_incorrect_event(event: &Event, msg: &str) {
    log_simulation_error(event, &format!("Incorrect event ({})", msg));
}

/// Returns the payload type name of the event, used in traces.
pub(crate) fn event_type_name(event: &Event) -> &'static str {
    type_name(&event.data).unwrap_or("unknown")
}
