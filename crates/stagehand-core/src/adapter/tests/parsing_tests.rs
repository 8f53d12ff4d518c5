use crate::adapter::gitea::push_changed_remote;
use crate::adapter::keyscan::parse_scan;
use crate::adapter::kubectl::rollout_complete;
use crate::adapter::{RepositoryRef, WorkloadRef};

#[test]
fn test_workload_ref_parsing() {
    let workload: WorkloadRef = "deployment/gitea/gitea".parse().expect("valid reference");
    assert_eq!(workload, WorkloadRef::new("deployment", "gitea", "gitea"));
    assert_eq!(workload.to_string(), "deployment/gitea/gitea");

    assert!("deployment/gitea".parse::<WorkloadRef>().is_err());
    assert!("deployment//gitea".parse::<WorkloadRef>().is_err());
    assert!("a/b/c/d".parse::<WorkloadRef>().is_err());
}

#[test]
fn test_workload_ref_serde_as_string() {
    let workloads: Vec<WorkloadRef> =
        serde_json::from_str(r#"["statefulset/flux-system/source-controller"]"#).expect("deserialize");
    assert_eq!(workloads[0].kind, "statefulset");
    assert_eq!(workloads[0].namespace, "flux-system");
    let json = serde_json::to_string(&workloads).expect("serialize");
    assert_eq!(json, r#"["statefulset/flux-system/source-controller"]"#);

    let bad: Result<WorkloadRef, _> = serde_json::from_str(r#""nope""#);
    assert!(bad.is_err());
}

#[test]
fn test_repository_ref_display() {
    assert_eq!(RepositoryRef::new("ops", "fleet").to_string(), "ops/fleet");
}

#[test]
fn test_rollout_complete_detection() {
    assert!(rollout_complete("deployment \"gitea\" successfully rolled out\n"));
    assert!(rollout_complete("partitioned roll out complete: 1 new pods have been updated...\n"));
    assert!(!rollout_complete(
        "Waiting for deployment \"gitea\" rollout to finish: 0 of 1 updated replicas are available...\n"
    ));
}

#[test]
fn test_keyscan_parsing_drops_banners() {
    let output = "# gitea-ssh:22 SSH-2.0-Go\n\
                  [gitea-ssh]:2222 ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIExample\n\
                  \n\
                  [gitea-ssh]:2222 ssh-rsa AAAAB3NzaC1yc2EAAAADAQABAAABAQExample\n";
    let lines = parse_scan(output, "gitea-ssh", 2222).expect("keys present");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].contains("ssh-ed25519"));

    let err = parse_scan("# gitea-ssh:22 SSH-2.0-Go\n", "gitea-ssh", 22).expect_err("no keys");
    assert!(err.is_transient());
}

#[test]
fn test_porcelain_push_detection() {
    let up_to_date = "To ssh://git@localhost:2222/ops/fleet.git\n=\tHEAD:refs/heads/main\t[up to date]\nDone\n";
    assert!(!push_changed_remote(up_to_date));

    let created = "To ssh://git@localhost:2222/ops/fleet.git\n*\tHEAD:refs/heads/main\t[new branch]\nDone\n";
    assert!(push_changed_remote(created));

    let forced = "To ssh://git@localhost:2222/ops/fleet.git\n+\tHEAD:refs/heads/main\tabc...def (forced update)\nDone\n";
    assert!(push_changed_remote(forced));
}
