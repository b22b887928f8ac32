// Fatal, non-recoverable conditions. The Rust analogue of the original's
// `ERROR()` macro / `ErrorError` exception: unreachable branches and
// consistency-check violations that escape the interpreter loop entirely.
// Faults and traps (PageFault, StackError, OpcodeTrap, ...) are *not* here --
// those are routine control flow handled by `StepResult::Abort` and never
// reach `main`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FatalError {
    #[error("unreachable: {what} at {location}")]
    Unreachable { what: String, location: &'static str },

    #[error("unknown control link tag encountered during xfer resolution")]
    UnknownControlLinkTag,

    #[error("vacant map entry for page {page:#x} carries nonzero real page {real_page:#x}")]
    VacantMapWithNonzeroRealPage { page: u32, real_page: u32 },

    #[error("page/flag array divergence for page {page:#x}")]
    PageFlagDivergence { page: u32 },

    #[error("stack underflow observed after SP==0 guard already fired")]
    StackUnderflowPastGuard,

    #[error("indirect control link chase exceeded the implementation bound")]
    IndirectChaseOverflow,

    #[error("boot switch string is malformed: {0}")]
    BootSwitchParse(String),

    #[error("germ image load failed: {0}")]
    GermLoad(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Last-known register state, logged alongside a `FatalError` before the
/// process exits (7 "logging GFI/CB/PC").
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultContext {
    pub gfi: u16,
    pub cb: u32,
    pub pc: u16,
}

pub fn report_fatal(err: &FatalError, ctx: FaultContext) {
    log::error!(
        "ERRORERROR: {err} (gfi={:#x} cb={:#x} pc={:#x})",
        ctx.gfi,
        ctx.cb,
        ctx.pc
    );
}
