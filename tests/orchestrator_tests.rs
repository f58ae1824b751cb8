// Orchestrator scenarios: create/toggle/delete/list/stats through the uniform response shape.

mod common;

use common::{argv, panel, test_env};
use hostpanel::models::{NotificationKind, PanelEvent};
use hostpanel::orchestrator::{CreateSiteRequest, ObtainCertificateRequest};
use tokio::sync::broadcast;

fn create_request(domain: &str) -> CreateSiteRequest {
    CreateSiteRequest {
        domain: domain.into(),
        ..Default::default()
    }
}

fn notifications(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<(NotificationKind, String)> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PanelEvent::Notification(n) = event {
            out.push((n.kind, n.message));
        }
    }
    out
}

#[tokio::test]
async fn test_create_site_scenario() {
    let env = test_env();
    let panel = panel(&env.config).await;
    let mut rx = panel.orchestrator.subscribe();

    let resp = panel
        .orchestrator
        .create_site(create_request("example.com"))
        .await;
    assert!(resp.success, "{:?}", resp.error);
    let created = resp.data.unwrap();
    assert!(created.index_created);
    assert!(created.site.enabled);
    assert!(created.certificate_error.is_none());

    let config = std::fs::read_to_string(panel.sites.config_path("example.com")).unwrap();
    assert!(config.contains("server_name example.com;"));
    assert!(panel.sites.marker_exists("example.com").await);
    let index = env.config.paths.web_root.join("example.com").join("index.html");
    assert!(index.exists());

    assert_eq!(
        notifications(&mut rx),
        vec![(
            NotificationKind::Success,
            "Website example.com created successfully".to_string()
        )]
    );
}

#[tokio::test]
async fn test_create_twice_conflicts() {
    let env = test_env();
    let panel = panel(&env.config).await;
    assert!(panel.orchestrator.create_site(create_request("example.com")).await.success);
    let before = std::fs::read_to_string(panel.sites.config_path("example.com")).unwrap();

    let resp = panel
        .orchestrator
        .create_site(CreateSiteRequest {
            domain: "example.com".into(),
            php: true,
            ..Default::default()
        })
        .await;
    assert!(!resp.success);
    assert!(resp.data.is_none());
    assert_eq!(resp.error_kind(), Some("conflict_error"));
    let after = std::fs::read_to_string(panel.sites.config_path("example.com")).unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_create_rejects_bad_input_without_side_effects() {
    let env = test_env();
    let panel = panel(&env.config).await;

    for domain in ["", "exa mple.com", "evil.com;", "../../etc"] {
        let resp = panel.orchestrator.create_site(create_request(domain)).await;
        assert_eq!(resp.error_kind(), Some("validation_error"), "{:?}", domain);
    }
    let resp = panel
        .orchestrator
        .create_site(CreateSiteRequest {
            domain: "example.com".into(),
            document_root: Some("relative/root".into()),
            ..Default::default()
        })
        .await;
    assert_eq!(resp.error_kind(), Some("validation_error"));
    assert!(panel.sites.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_create_normalizes_domain_case() {
    let env = test_env();
    let panel = panel(&env.config).await;
    let resp = panel
        .orchestrator
        .create_site(create_request("  Example.COM "))
        .await;
    assert!(resp.success);
    assert_eq!(resp.data.unwrap().site.name, "example.com");
}

#[tokio::test]
async fn test_create_with_ssl_obtains_certificate() {
    let env = test_env();
    let panel = panel(&env.config).await;
    let resp = panel
        .orchestrator
        .create_site(CreateSiteRequest {
            domain: "secure.example".into(),
            ssl: true,
            ..Default::default()
        })
        .await;
    assert!(resp.success);
    assert!(resp.data.unwrap().certificate_error.is_none());

    let stats = panel.orchestrator.get_stats().await.data.unwrap();
    assert_eq!((stats.ssl.issued, stats.ssl.total), (1, 1));
}

#[tokio::test]
async fn test_certificate_failure_keeps_site() {
    let mut env = test_env();
    env.config.commands.acme_obtain = argv(&["false"]);
    let panel = panel(&env.config).await;
    let mut rx = panel.orchestrator.subscribe();

    let resp = panel
        .orchestrator
        .create_site(CreateSiteRequest {
            domain: "secure.example".into(),
            ssl: true,
            ..Default::default()
        })
        .await;
    assert!(resp.success);
    assert!(resp.data.unwrap().certificate_error.is_some());
    assert!(panel.sites.marker_exists("secure.example").await);

    let kinds: Vec<NotificationKind> = notifications(&mut rx).into_iter().map(|(k, _)| k).collect();
    assert_eq!(kinds, vec![NotificationKind::Error, NotificationKind::Success]);
}

#[tokio::test]
async fn test_toggle_then_list_scenario() {
    let env = test_env();
    let panel = panel(&env.config).await;
    assert!(panel.orchestrator.create_site(create_request("example.com")).await.success);

    let resp = panel.orchestrator.toggle_site("example.com", false).await;
    assert!(resp.success);
    let sites = panel.orchestrator.list_sites().await.data.unwrap();
    assert_eq!(sites.len(), 1);
    assert!(!sites[0].enabled);
    assert!(!panel.sites.marker_exists("example.com").await);

    let missing = panel.orchestrator.toggle_site("nope.example", true).await;
    assert_eq!(missing.error_kind(), Some("not_found"));
}

#[tokio::test]
async fn test_delete_site() {
    let env = test_env();
    let panel = panel(&env.config).await;
    assert!(panel.orchestrator.create_site(create_request("example.com")).await.success);

    let resp = panel.orchestrator.delete_site("example.com").await;
    assert_eq!(resp.data.unwrap()["removed"], true);
    let again = panel.orchestrator.delete_site("example.com").await;
    assert!(again.success);
    assert_eq!(again.data.unwrap()["removed"], false);
    assert!(panel.orchestrator.list_sites().await.data.unwrap().is_empty());
}

#[tokio::test]
async fn test_obtain_certificate_requires_existing_site() {
    let env = test_env();
    let panel = panel(&env.config).await;
    let resp = panel
        .orchestrator
        .obtain_certificate(ObtainCertificateRequest {
            domain: "example.com".into(),
            email: None,
        })
        .await;
    assert_eq!(resp.error_kind(), Some("not_found"));

    assert!(panel.orchestrator.create_site(create_request("example.com")).await.success);
    let resp = panel
        .orchestrator
        .obtain_certificate(ObtainCertificateRequest {
            domain: "example.com".into(),
            email: Some("admin@example.com".into()),
        })
        .await;
    assert!(resp.success);
    assert_eq!(resp.data.unwrap().email, "admin@example.com");
}

#[tokio::test]
async fn test_get_stats_aggregates() {
    let env = test_env();
    let panel = panel(&env.config).await;
    assert!(panel.orchestrator.create_site(create_request("a.example")).await.success);
    assert!(panel.orchestrator.create_site(create_request("b.example")).await.success);
    assert!(panel.orchestrator.toggle_site("b.example", false).await.success);
    panel.sampler.tick().await;

    let resp = panel.orchestrator.get_stats().await;
    assert!(resp.success);
    let stats = resp.data.unwrap();
    assert_eq!((stats.sites.active, stats.sites.total), (1, 2));
    assert_eq!(stats.databases.map(|d| d.total), Some(1));
    assert_eq!(stats.history.cpu.len(), 1);
    assert_eq!(stats.services.len(), 2);
    assert!((0.0..=100.0).contains(&stats.system.cpu));
}

#[tokio::test]
async fn test_issued_site_survives_failed_reread() {
    let mut env = test_env();
    // After issuing, the available dir is replaced by a plain file, so re-reading the site
    // fails with ENOTDIR.
    let available = env.config.paths.sites_available.clone();
    env.config.commands.acme_obtain = argv(&[
        "sh",
        "-c",
        "rm -rf \"$0\" && touch \"$0\"",
        available.to_str().unwrap(),
    ]);
    let panel = panel(&env.config).await;

    let resp = panel
        .orchestrator
        .create_site(CreateSiteRequest {
            domain: "example.com".into(),
            ssl: true,
            ..Default::default()
        })
        .await;
    assert!(resp.success, "{:?}", resp.error);
    let created = resp.data.unwrap();
    assert_eq!(created.site.name, "example.com");
    assert!(created.site.enabled);
    assert!(created.certificate_error.is_none());
}
