//! Timing interpretation pipeline stages
//!
//! ```text
//! calibrate ──► locate ──► classify ──┬──► extents ──► signatures
//!     │                       ▲       └──► accuracy
//!     └───────────────────────┘
//! ```
//!
//! Each stage is a function over immutable inputs; only `calibrate`,
//! `locate` and `classify` touch the external primitives, through the
//! traits in [`crate::probe`].

pub mod accuracy;
pub mod calibrate;
pub mod classify;
pub mod extents;
pub mod locate;
pub mod signatures;

pub use accuracy::{evaluate, AccuracyReport, Mismatch};
pub use calibrate::{calibrate, Calibration, ThresholdOverrides};
pub use classify::{classify, derive_label, label_points, relabel};
pub use extents::{build_map, merge_extents, parse_map, render_map, MAP_HEADER};
pub use locate::{find_bounds, locate, RegionBounds};
pub use signatures::{generate_table, match_modules, MatchOutcome, SignatureTable};
