//! Project discovery: language/framework detection and file scanning.

pub mod detector;
pub mod scanner;

pub use detector::{DetectedProject, ProjectDetector, ProjectType};
pub use scanner::{
    ScanDiagnostic, ScanDiff, ScanOutcome, ScannedFile, Scanner, SkipReason, hash_bytes,
};
