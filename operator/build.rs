use dr_syncer_types::{ClusterMapping, NamespaceMapping, RemoteCluster};
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/dr-syncer.io_remoteclusters.yaml",
        serde_yaml::to_string(&RemoteCluster::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/dr-syncer.io_clustermappings.yaml",
        serde_yaml::to_string(&ClusterMapping::crd()).unwrap(),
    )
    .unwrap();
    fs::write(
        "../crds/dr-syncer.io_namespacemappings.yaml",
        serde_yaml::to_string(&NamespaceMapping::crd()).unwrap(),
    )
    .unwrap();
}
