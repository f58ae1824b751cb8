// Notifier tests: push fan-out, dedup window, error-only email.

mod common;

use common::{argv, test_env};
use hostpanel::executor::CommandExecutor;
use hostpanel::models::{NotificationKind, PanelEvent, SystemUpdate, TickStats};
use hostpanel::notifier::{Mailer, Notifier};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_emit_pushes_to_every_subscriber() {
    let env = test_env();
    let notifier = common::notifier(&env.config);
    let mut a = notifier.subscribe();
    let mut b = notifier.subscribe();

    let sent = notifier
        .emit(NotificationKind::Success, "Website example.com created", json!({}))
        .await
        .unwrap();
    for rx in [&mut a, &mut b] {
        match rx.try_recv().unwrap() {
            PanelEvent::Notification(n) => assert_eq!(n.id, sent.id),
            other => panic!("unexpected: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_identical_notifications_deduplicated_within_window() {
    let env = test_env();
    let notifier = common::notifier(&env.config);
    let mut rx = notifier.subscribe();

    assert!(notifier.emit(NotificationKind::Error, "disk full", json!({})).await.is_some());
    assert!(notifier.emit(NotificationKind::Error, "disk full", json!({"n": 2})).await.is_none());
    // Different kind or message is a different notification.
    assert!(notifier.emit(NotificationKind::Info, "disk full", json!({})).await.is_some());
    assert!(notifier.emit(NotificationKind::Error, "disk almost full", json!({})).await.is_some());

    let mut count = 0;
    while rx.try_recv().is_ok() {
        count += 1;
    }
    assert_eq!(count, 3);
}

#[tokio::test(start_paused = true)]
async fn test_dedup_expires_after_window() {
    let notifier = Notifier::new(8, None, Duration::from_secs(60));
    assert!(notifier.emit(NotificationKind::Error, "x", json!({})).await.is_some());
    tokio::time::advance(Duration::from_secs(30)).await;
    assert!(notifier.emit(NotificationKind::Error, "x", json!({})).await.is_none());
    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(notifier.emit(NotificationKind::Error, "x", json!({})).await.is_some());
}

#[tokio::test]
async fn test_error_notifications_are_mailed() {
    let mut env = test_env();
    let outbox = env.root().join("outbox");
    env.config.alerts.alert_email = Some("admin@example.com".into());
    env.config.commands.sendmail = argv(&["sh", "-c", "cat >> \"$0\"", outbox.to_str().unwrap()]);
    let notifier = common::notifier(&env.config);

    notifier
        .emit(NotificationKind::Info, "Backup started", json!({}))
        .await;
    assert!(!outbox.exists());

    notifier
        .emit(
            NotificationKind::Error,
            "High CPU usage detected",
            json!({ "usage": "97.0" }),
        )
        .await;
    let mail = std::fs::read_to_string(&outbox).unwrap();
    assert!(mail.contains("To: admin@example.com"));
    assert!(mail.contains("Subject: Server Alert: High CPU usage detected"));
    assert!(mail.contains("97.0"));
}

#[tokio::test]
async fn test_mail_failure_does_not_block_push() {
    let mut env = test_env();
    env.config.alerts.alert_email = Some("admin@example.com".into());
    env.config.commands.sendmail = argv(&["false"]);
    let notifier = common::notifier(&env.config);
    let mut rx = notifier.subscribe();

    let sent = notifier
        .emit(NotificationKind::Error, "Scheduled job backup failed", json!({}))
        .await;
    assert!(sent.is_some());
    assert!(matches!(rx.try_recv(), Ok(PanelEvent::Notification(_))));
}

#[test]
fn test_mail_body_escapes_markup() {
    let mut env = test_env();
    env.config.alerts.alert_email = Some("admin@example.com".into());
    let mailer = Mailer::from_config(&env.config, CommandExecutor::new()).unwrap();
    let n = hostpanel::models::Notification::new(
        NotificationKind::Error,
        "<script>x</script>".into(),
        json!({}),
    );
    let body = mailer.compose(&n);
    assert!(body.contains("<strong>Message:</strong> &lt;script&gt;x&lt;/script&gt;"));
}

#[tokio::test]
async fn test_publish_without_observers_is_fine() {
    let env = test_env();
    let notifier = common::notifier(&env.config);
    let delivered = notifier.publish(SystemUpdate::Stats(TickStats {
        timestamp: chrono::Utc::now(),
        cpu: Some(1.0),
        memory: None,
        disk_usage_percent: None,
    }));
    assert_eq!(delivered, 0);
}
