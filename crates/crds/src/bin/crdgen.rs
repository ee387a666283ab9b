//! Prints the PodSet CustomResourceDefinition as YAML.
//!
//! `cargo run -p crds --bin crdgen > config/crd/podset.yaml`

use crds::PodSet;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&PodSet::crd())?);
    Ok(())
}
