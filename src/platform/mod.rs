//! OS fault-delivery backends.
//!
//! A backend installs the process-wide hook, translates each delivery into
//! a [`FaultEvent`](crate::FaultEvent), hands it to the active handler and
//! carries out the returned [`Disposition`](crate::handler::Disposition).

#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
pub use self::linux::LiveProcess;
#[cfg(target_os = "linux")]
pub(crate) use self::linux::{install, uninstall};

#[cfg(not(target_os = "linux"))]
pub(crate) fn install() -> Result<(), rootcause::Report<crate::hooks::InitializeError>> {
    Err(rootcause::Report::new(crate::hooks::InitializeError::Unsupported))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn uninstall() {}
