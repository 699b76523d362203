//! CSI-Addons operation CRDs
//!
//! Resources for out-of-band storage operations:
//! - NetworkFence and NetworkFenceClass
//! - ReclaimSpaceJob and ReclaimSpaceCronJob
//! - EncryptionKeyRotationJob and EncryptionKeyRotationCronJob

pub mod encryption_key_rotation;
pub mod job;
pub mod network_fence;
pub mod network_fence_class;
pub mod reclaim_space;

pub use encryption_key_rotation::*;
pub use job::*;
pub use network_fence::*;
pub use network_fence_class::*;
pub use reclaim_space::*;
