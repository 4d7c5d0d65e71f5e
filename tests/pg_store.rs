use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use welcomepage_backend::publishing::{
    BillingStatus, PgSubmissionStore, SubmissionStatus, SubmissionStore, TeamTier,
};

async fn insert_team(pool: &PgPool, public_id: &str, customer: Option<&str>) -> i64 {
    sqlx::query_scalar(
        "INSERT INTO teams (public_id, organization_name, stripe_customer_id, stripe_subscription_status, slack_settings) \
         VALUES ($1, $2, $3, $4, $5) RETURNING id",
    )
    .bind(public_id)
    .bind(format!("{public_id} inc"))
    .bind(customer)
    .bind(customer.map(|_| "active"))
    .bind(serde_json::json!({ "publish_channel": { "id": "C1" } }))
    .fetch_one(pool)
    .await
    .unwrap()
}

async fn insert_submission(pool: &PgPool, team_id: i64, public_id: &str, status: &str) {
    let queued_at = (status == "queued").then(|| Utc::now() - Duration::hours(1));
    sqlx::query(
        "INSERT INTO submissions (public_id, team_id, owner_name, status, queued_at) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(public_id)
    .bind(team_id)
    .bind("Owner")
    .bind(status)
    .bind(queued_at)
    .execute(pool)
    .await
    .unwrap();
}

// key: publish-store-tests -> conditional transitions against postgres
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn draft_transitions_are_conditional(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    insert_submission(&pool, team_id, "sub-1", "draft").await;
    insert_submission(&pool, team_id, "sub-2", "draft").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();

    assert!(store.publish_draft("sub-1", None, Some("pi_1"), now).await.unwrap());
    assert!(!store.publish_draft("sub-1", None, Some("pi_2"), now).await.unwrap());
    assert!(!store.queue_draft("sub-1", now).await.unwrap());

    let published = store.submission("sub-1").await.unwrap().unwrap();
    assert_eq!(published.status, SubmissionStatus::Published);
    assert!(published.paid);
    assert_eq!(published.charge_reference.as_deref(), Some("pi_1"));
    assert_eq!(store.published_count(team_id).await.unwrap(), 1);

    assert!(store.queue_draft("sub-2", now).await.unwrap());
    assert!(!store.queue_draft("sub-2", now).await.unwrap());
    let queued = store.submission("sub-2").await.unwrap().unwrap();
    assert_eq!(queued.status, SubmissionStatus::Queued);
    assert!(queued.queued_at.is_some());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn team_rows_map_to_accounts(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    sqlx::query("UPDATE teams SET subscription_status = 'unlimited' WHERE id = $1")
        .bind(team_id)
        .execute(&pool)
        .await
        .unwrap();
    let store = PgSubmissionStore::new(pool.clone());

    let team = store.team_by_public_id("team-a").await.unwrap().unwrap();
    assert_eq!(team.id, team_id);
    assert_eq!(team.tier, TeamTier::Unlimited);
    assert_eq!(team.billing_status, BillingStatus::Active);
    assert_eq!(team.stripe_customer_id.as_deref(), Some("cus_a"));
    assert!(store.team_by_public_id("missing").await.unwrap().is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn claims_exclude_concurrent_runs(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    insert_submission(&pool, team_id, "sub-q", "queued").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();
    let (first_run, second_run) = (Uuid::new_v4(), Uuid::new_v4());

    let claimed = store
        .claim_queued("sub-q", first_run, now, now + Duration::seconds(120))
        .await
        .unwrap();
    assert!(claimed.is_some());
    assert!(store
        .claim_queued("sub-q", second_run, now, now + Duration::seconds(120))
        .await
        .unwrap()
        .is_none());

    assert!(!store
        .complete_queued("sub-q", second_run, Some("pi_x"), now)
        .await
        .unwrap());
    assert!(store
        .complete_queued("sub-q", first_run, Some("pi_1"), now)
        .await
        .unwrap());

    let stored = store.submission("sub-q").await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Published);
    assert!(stored.queued_at.is_none());
    assert!(store.queued_submissions().await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn expired_lease_can_be_reclaimed_and_decline_advances_attempt(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    insert_submission(&pool, team_id, "sub-q", "queued").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();
    let (first_run, second_run) = (Uuid::new_v4(), Uuid::new_v4());

    store
        .claim_queued("sub-q", first_run, now, now - Duration::seconds(1))
        .await
        .unwrap()
        .unwrap();
    let reclaimed = store
        .claim_queued("sub-q", second_run, now, now + Duration::seconds(60))
        .await
        .unwrap();
    assert!(reclaimed.is_some());

    assert!(!store.release_claim("sub-q", first_run, true).await.unwrap());
    assert!(store.release_claim("sub-q", second_run, true).await.unwrap());
    let stored = store.submission("sub-q").await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Queued);
    assert_eq!(stored.charge_attempt, 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn notifications_and_expiry(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", None).await;
    insert_submission(&pool, team_id, "sub-p", "draft").await;
    insert_submission(&pool, team_id, "sub-q", "queued").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();

    store.publish_draft("sub-p", None, None, now).await.unwrap();
    store.set_notification_pending("sub-p", true).await.unwrap();
    let pending = store.pending_notifications(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].public_id, "sub-p");
    assert!(store.take_notification("sub-p").await.unwrap());
    assert!(!store.take_notification("sub-p").await.unwrap());
    assert!(store.pending_notifications(10).await.unwrap().is_empty());

    assert_eq!(store.expire_queued_before(now - Duration::days(1), now).await.unwrap(), 0);
    assert_eq!(store.expire_queued_before(now, now).await.unwrap(), 1);
    assert_eq!(
        store.submission("sub-q").await.unwrap().unwrap().status,
        SubmissionStatus::Draft
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn leased_draft_only_publishes_under_its_claim(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    insert_submission(&pool, team_id, "sub-d", "draft").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();
    let (holder, other) = (Uuid::new_v4(), Uuid::new_v4());

    let claimed = store
        .claim_draft("sub-d", holder, now, now + Duration::seconds(120))
        .await
        .unwrap();
    assert!(claimed.is_some());
    assert!(store
        .claim_draft("sub-d", other, now, now + Duration::seconds(120))
        .await
        .unwrap()
        .is_none());

    assert!(!store.publish_draft("sub-d", None, None, now).await.unwrap());
    assert!(!store.publish_draft("sub-d", Some(other), Some("pi_x"), now).await.unwrap());
    assert!(!store.queue_draft("sub-d", now).await.unwrap());
    assert!(store.publish_draft("sub-d", Some(holder), Some("pi_1"), now).await.unwrap());

    let stored = store.submission("sub-d").await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Published);
    assert_eq!(stored.charge_reference.as_deref(), Some("pi_1"));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn released_draft_claim_advances_attempt_on_decline(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let team_id = insert_team(&pool, "team-a", Some("cus_a")).await;
    insert_submission(&pool, team_id, "sub-d", "draft").await;
    let store = PgSubmissionStore::new(pool.clone());
    let now = Utc::now();
    let holder = Uuid::new_v4();

    store
        .claim_draft("sub-d", holder, now, now + Duration::seconds(120))
        .await
        .unwrap()
        .unwrap();
    assert!(store.release_claim("sub-d", holder, true).await.unwrap());

    let stored = store.submission("sub-d").await.unwrap().unwrap();
    assert_eq!(stored.status, SubmissionStatus::Draft);
    assert_eq!(stored.charge_attempt, 1);
    assert!(store.publish_draft("sub-d", None, None, now).await.unwrap());
}
