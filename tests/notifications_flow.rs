mod common;

use anyhow::Result;
use caseflow::models::{NotificationKind, NotificationStatus, UserRole};
use caseflow::notifications::{DbNotifier, Notifier};
use common::{acquire_db_lock, TestApp};
use uuid::Uuid;

#[tokio::test]
async fn db_notifier_inserts_one_row_per_distinct_recipient() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let first = app
        .insert_user("dana@harbor.test", "Dana Reyes", UserRole::Mediator, None)
        .await?;
    let second = app
        .insert_user("sam@client.test", "Sam Ortiz", UserRole::Divorcee, None)
        .await?;

    let notifier = DbNotifier::new(app.state.pool.clone());
    // Duplicates and nil ids are dropped; the rest each get a row.
    notifier
        .notify(
            &[first, second, second, Uuid::nil()],
            "A document was shared with you",
            NotificationKind::Upload,
        )
        .await?;

    let first_rows = app.notifications_for(first).await?;
    assert_eq!(first_rows.len(), 1);
    assert_eq!(first_rows[0].message, "A document was shared with you");
    assert_eq!(first_rows[0].kind, NotificationKind::Upload);
    assert_eq!(first_rows[0].status, NotificationStatus::Unread);

    let second_rows = app.notifications_for(second).await?;
    assert_eq!(second_rows.len(), 1);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn failed_recipient_does_not_block_the_rest() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let known = app
        .insert_user("dana@harbor.test", "Dana Reyes", UserRole::Mediator, None)
        .await?;
    // No users row exists for this id, so its insert violates the FK.
    let unknown = Uuid::new_v4();

    let notifier = DbNotifier::new(app.state.pool.clone());
    notifier
        .notify(
            &[unknown, known],
            "Case staffing changed",
            NotificationKind::Participant,
        )
        .await?;

    let rows = app.notifications_for(known).await?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].kind, NotificationKind::Participant);

    app.cleanup().await?;
    Ok(())
}
