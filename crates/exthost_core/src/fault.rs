//! Fault capture and isolation boundaries around extension code.
//!
//! # Responsibility
//! - Run extension code under `catch_unwind` and turn both panics and
//!   returned errors into `CapturedFault` values.
//! - Track which extension is executing on the current thread so a fault is
//!   attributed to the code that raised it, not to whoever caught it.
//!
//! # Invariants
//! - The process panic hook is installed at most once.
//! - Panics inside a boundary are recorded, not echoed by the previous hook;
//!   panics outside every boundary are logged and forwarded unchanged.
//! - The execution context is restored on every exit path, including unwind.
//! - A hook capture is only used for the payload it was taken from.

use crate::logging::sanitize_message;
use log::error;
use once_cell::sync::OnceCell;
use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::error::Error;
use std::fmt::Write as _;
use std::panic::{self, AssertUnwindSafe, PanicHookInfo};

/// Error type returned by extension entry points, panel factories and actions.
pub type ExtensionError = Box<dyn Error + Send + Sync + 'static>;
/// Result alias for extension code.
pub type ExtensionResult<T = ()> = Result<T, ExtensionError>;

const MAX_SUMMARY_CHARS: usize = 160;

static FAULT_HOOK_INSTALLED: OnceCell<()> = OnceCell::new();

thread_local! {
    static EXECUTION_CONTEXT: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static BOUNDARY_DEPTH: Cell<usize> = const { Cell::new(0) };
    static LAST_PANIC: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

struct PanicCapture {
    message: String,
    location: String,
    backtrace: String,
    context: Option<String>,
}

/// A fault caught at an isolation boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFault {
    /// One-line, sanitized description suitable for list views.
    pub summary: String,
    /// Full detail: error source chain, or panic location and backtrace.
    pub detail: String,
    /// Extension that was executing when the fault was raised, if any.
    pub context: Option<String>,
    pub panicked: bool,
}

impl CapturedFault {
    fn from_error(err: &(dyn Error + 'static), context: Option<String>) -> Self {
        let mut detail = err.to_string();
        let mut source = err.source();
        if source.is_some() {
            detail.push_str("\n\nCaused by:");
        }
        let mut index = 0;
        while let Some(cause) = source {
            let _ = write!(detail, "\n    {index}: {cause}");
            source = cause.source();
            index += 1;
        }

        let first_line = err.to_string().lines().next().unwrap_or_default().to_string();
        Self {
            summary: sanitize_message(&first_line, MAX_SUMMARY_CHARS),
            detail,
            context,
            panicked: false,
        }
    }

    fn from_panic(
        payload: Box<dyn Any + Send>,
        capture: Option<PanicCapture>,
        fallback_context: Option<String>,
    ) -> Self {
        let message = capture
            .as_ref()
            .map(|capture| capture.message.clone())
            .unwrap_or_else(|| payload_message(payload.as_ref()));
        let summary = sanitize_message(&format!("panicked: {message}"), MAX_SUMMARY_CHARS);
        match capture {
            Some(capture) => Self {
                summary,
                detail: format!(
                    "panicked at {}:\n{}\n\nstack backtrace:\n{}",
                    capture.location, capture.message, capture.backtrace
                ),
                context: capture.context.or(fallback_context),
                panicked: true,
            },
            None => Self {
                summary,
                detail: format!("panicked: {message}\n\n(no backtrace captured)"),
                context: fallback_context,
                panicked: true,
            },
        }
    }
}

/// Installs the process panic hook used by isolation boundaries.
///
/// Safe to call repeatedly; only the first call installs the hook.
pub fn install_fault_hook() {
    FAULT_HOOK_INSTALLED.get_or_init(|| {
        let previous_hook = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let inside_boundary = BOUNDARY_DEPTH
                .try_with(|depth| depth.get() > 0)
                .unwrap_or(false);
            if inside_boundary {
                let capture = PanicCapture {
                    message: hook_message(info),
                    location: hook_location(info),
                    backtrace: Backtrace::force_capture().to_string(),
                    context: current_extension(),
                };
                let _ = LAST_PANIC.try_with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = Some(capture);
                    }
                });
                return;
            }

            error!(
                "event=panic_captured module=fault status=error location={} payload={}",
                hook_location(info),
                sanitize_message(&hook_message(info), MAX_SUMMARY_CHARS)
            );
            previous_hook(info);
        }));
    });
}

/// Runs `call` inside an isolation boundary.
///
/// When `extension` is given, it becomes the current execution context for
/// the duration of the call. Panics and returned errors come back as
/// `CapturedFault`; nothing unwinds past this function.
pub fn isolate<T>(
    extension: Option<&str>,
    call: impl FnOnce() -> ExtensionResult<T>,
) -> Result<T, CapturedFault> {
    install_fault_hook();
    let _context = extension.map(enter_extension);
    let _boundary = BoundaryGuard::enter();

    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(CapturedFault::from_error(err.as_ref(), current_extension())),
        Err(payload) => {
            // resume_unwind skips the hook; only trust a capture of this payload.
            let message = payload_message(payload.as_ref());
            let capture = take_last_panic().filter(|capture| capture.message == message);
            Err(CapturedFault::from_panic(payload, capture, current_extension()))
        }
    }
}

/// Marks `extension` as executing on this thread until the scope is dropped.
///
/// For extension code the host runs without a boundary of its own: a fault
/// raised inside the scope and caught by an enclosing `isolate(None, ..)` is
/// still attributed to `extension`.
#[must_use = "the extension stops being current when the scope is dropped"]
pub fn enter_extension(extension: &str) -> ExecutionScope {
    EXECUTION_CONTEXT.with(|stack| stack.borrow_mut().push(extension.to_string()));
    ExecutionScope { _private: () }
}

/// Returns the extension executing on this thread, innermost first.
pub fn current_extension() -> Option<String> {
    EXECUTION_CONTEXT
        .try_with(|stack| {
            stack
                .try_borrow()
                .ok()
                .and_then(|stack| stack.last().cloned())
        })
        .ok()
        .flatten()
}

/// Guard returned by [`enter_extension`].
#[derive(Debug)]
pub struct ExecutionScope {
    _private: (),
}

impl Drop for ExecutionScope {
    fn drop(&mut self) {
        let _ = EXECUTION_CONTEXT.try_with(|stack| stack.borrow_mut().pop());
    }
}

struct BoundaryGuard;

impl BoundaryGuard {
    fn enter() -> Self {
        take_last_panic();
        BOUNDARY_DEPTH.with(|depth| depth.set(depth.get() + 1));
        Self
    }
}

impl Drop for BoundaryGuard {
    fn drop(&mut self) {
        let _ = BOUNDARY_DEPTH.try_with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

fn take_last_panic() -> Option<PanicCapture> {
    LAST_PANIC
        .try_with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .ok()
        .flatten()
}

fn hook_message(info: &PanicHookInfo<'_>) -> String {
    payload_message(info.payload())
}

fn hook_location(info: &PanicHookInfo<'_>) -> String {
    info.location()
        .map(|loc| format!("{}:{}", loc.file(), loc.line()))
        .unwrap_or_else(|| "unknown".to_string())
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
