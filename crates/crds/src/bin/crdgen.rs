//! Prints every CSI-Addons CRD as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bases/all.yaml`

use crds::{
    EncryptionKeyRotationCronJob, EncryptionKeyRotationJob, NetworkFence, NetworkFenceClass,
    ReclaimSpaceCronJob, ReclaimSpaceJob, VolumeGroupReplication, VolumeGroupReplicationClass,
    VolumeGroupReplicationContent, VolumeReplication, VolumeReplicationClass,
};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        VolumeReplicationClass::crd(),
        VolumeReplication::crd(),
        VolumeGroupReplicationClass::crd(),
        VolumeGroupReplication::crd(),
        VolumeGroupReplicationContent::crd(),
        NetworkFenceClass::crd(),
        NetworkFence::crd(),
        ReclaimSpaceJob::crd(),
        ReclaimSpaceCronJob::crd(),
        EncryptionKeyRotationJob::crd(),
        EncryptionKeyRotationCronJob::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
