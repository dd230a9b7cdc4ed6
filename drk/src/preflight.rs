//! Pre-flight checks for drk
//!
//! Validates the machine and the external probing binaries before any
//! measurement starts. Provides clear, actionable error messages when
//! requirements aren't met.

#![allow(unsafe_code)] // geteuid() requires unsafe

use crate::config::Binaries;
use anyhow::{bail, Context, Result};
use std::path::Path;

const CPUINFO: &str = "/proc/cpuinfo";
const CMDLINE: &str = "/proc/cmdline";

/// Whether KASLR is active according to the kernel command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KaslrState {
    Enabled,
    Disabled,
    /// Neither `kaslr` nor `nokaslr` on the command line
    Unspecified,
}

/// Run all pre-flight checks.
///
/// Binary existence is always checked; `skip_system` bypasses the CPU and
/// kernel command line checks.
pub fn run_preflight_checks(
    binaries: &Binaries,
    ground_truth: &Path,
    skip_system: bool,
    quiet: bool,
) -> Result<()> {
    for binary in binaries.all() {
        check_binary_exists(binary)?;
    }
    if skip_system {
        return Ok(());
    }
    check_tsx()?;
    check_kaslr(quiet);
    check_ground_truth_access(ground_truth, quiet);
    Ok(())
}

/// Check that an external primitive exists and is a file
fn check_binary_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        bail!(
            "Binary not found: {}\n\n\
             Build the probing tools first:\n  \
             cargo xtask build-probes --dir <probe sources>\n\
             or point --bin-dir at the directory holding measure, drk-probing and loop.",
            path.display()
        );
    }
    if !path.is_file() {
        bail!(
            "Not a file: {}\n\n\
             --bin-dir must hold the probing executables, not directories.",
            path.display()
        );
    }
    Ok(())
}

/// True when any `flags` line of cpuinfo lists `rtm`
#[must_use]
pub fn cpuinfo_has_rtm(cpuinfo: &str) -> bool {
    cpuinfo
        .lines()
        .filter(|l| l.starts_with("flags"))
        .filter_map(|l| l.split_once(':'))
        .any(|(_, flags)| flags.split_whitespace().any(|f| f == "rtm"))
}

#[must_use]
pub fn kaslr_state(cmdline: &str) -> KaslrState {
    let mut state = KaslrState::Unspecified;
    for arg in cmdline.split_whitespace() {
        match arg {
            "kaslr" => state = KaslrState::Enabled,
            "nokaslr" => state = KaslrState::Disabled,
            _ => {}
        }
    }
    state
}

/// TSX (RTM) is what makes the timing side channel work at all
fn check_tsx() -> Result<()> {
    let cpuinfo =
        std::fs::read_to_string(CPUINFO).with_context(|| format!("Failed to read {CPUINFO}"))?;
    if !cpuinfo_has_rtm(&cpuinfo) {
        bail!(
            "CPU does not advertise TSX (rtm flag missing in {CPUINFO}).\n\n\
             drk needs Intel TSX. It may be disabled by microcode or by the\n\
             tsx=off kernel parameter. Use --skip-preflight to measure anyway."
        );
    }
    Ok(())
}

/// Warning only: the map is meaningful with or without KASLR
fn check_kaslr(quiet: bool) {
    let Some(message) = kaslr_warning(std::fs::read_to_string(CMDLINE)) else {
        return;
    };
    if !quiet {
        eprintln!("warning: {message}");
    }
}

/// What to tell the operator about the kernel command line, if anything
fn kaslr_warning(cmdline: std::io::Result<String>) -> Option<String> {
    match cmdline {
        Err(e) => Some(format!("cannot read {CMDLINE} ({e}), KASLR state unknown")),
        Ok(cmdline) => match kaslr_state(&cmdline) {
            KaslrState::Enabled => None,
            KaslrState::Disabled => {
                Some("booted with nokaslr, the kernel sits at its default address".to_string())
            }
            KaslrState::Unspecified => {
                Some("kaslr not on the kernel command line, it may be off".to_string())
            }
        },
    }
}

/// Root, or at least a readable page-table dump, is needed to score results
fn check_ground_truth_access(ground_truth: &Path, quiet: bool) {
    if quiet || unsafe { libc::geteuid() } == 0 {
        return;
    }
    if std::fs::File::open(ground_truth).is_err() {
        eprintln!(
            "warning: cannot read {}, accuracy will not be scored (run with sudo)",
            ground_truth.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpuinfo_has_rtm() {
        let yes = "processor\t: 0\nflags\t\t: fpu vme hle avx2 rtm smap\n";
        let no = "processor\t: 0\nflags\t\t: fpu vme hle avx2 smap rtmx\n";
        assert!(cpuinfo_has_rtm(yes));
        assert!(!cpuinfo_has_rtm(no));
        assert!(!cpuinfo_has_rtm("model name : rtm\n"));
    }

    #[test]
    fn test_kaslr_state() {
        assert_eq!(kaslr_state("BOOT_IMAGE=/vmlinuz root=/dev/sda1 kaslr quiet"), KaslrState::Enabled);
        assert_eq!(kaslr_state("BOOT_IMAGE=/vmlinuz nokaslr"), KaslrState::Disabled);
        assert_eq!(kaslr_state("BOOT_IMAGE=/vmlinuz ro"), KaslrState::Unspecified);
    }

    #[test]
    fn test_unreadable_cmdline_only_warns() {
        let unreadable = Err(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        let message = kaslr_warning(unreadable).unwrap();
        assert!(message.contains("KASLR state unknown"));

        assert!(kaslr_warning(Ok("ro kaslr".to_string())).is_none());
        assert!(kaslr_warning(Ok("ro nokaslr".to_string())).unwrap().contains("nokaslr"));
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let binaries = Binaries::in_dir(dir.path());
        let err = run_preflight_checks(&binaries, Path::new("/nonexistent"), true, true).unwrap_err();
        assert!(err.to_string().contains("Binary not found"));
        assert!(err.to_string().contains("measure"));
    }

    #[test]
    fn test_directory_is_not_a_binary() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["measure", "drk-probing", "loop"] {
            std::fs::create_dir(dir.path().join(name)).unwrap();
        }
        let err = run_preflight_checks(&Binaries::in_dir(dir.path()), Path::new("/x"), true, true)
            .unwrap_err();
        assert!(err.to_string().contains("Not a file"));
    }

    #[test]
    fn test_present_binaries_pass_when_system_checks_skipped() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["measure", "drk-probing", "loop"] {
            std::fs::write(dir.path().join(name), "").unwrap();
        }
        run_preflight_checks(&Binaries::in_dir(dir.path()), Path::new("/x"), true, true).unwrap();
    }
}
