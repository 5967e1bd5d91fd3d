//! Kubelet pod-resources API (`v1.PodResourcesLister`)
//!
//! Generated from `proto/pod_resources.proto`, the subset of the kubelet
//! `podresources/v1` API needed to attribute devices to containers.

tonic::include_proto!("v1");
