use kube::CustomResourceExt;
use rebalance_types::*;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/kafka.strimzi.io_kafkarebalances_crd.yaml",
        serde_yaml::to_string(&KafkaRebalance::crd()).unwrap(),
    )
    .unwrap();
}
