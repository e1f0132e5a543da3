use dynakit::engine::EngineOp;
use dynakit::{
    AccessError, AccessLayer, AccessLayerConfig, AuthorizationRecord, EngineError, Key, Result,
    SubscriptionTier, TargetRecord,
};

fn admin_record(admins: &[&str]) -> AuthorizationRecord {
    AuthorizationRecord {
        pk: "ADMIN#acme".into(),
        organization: "Acme".into(),
        admins: admins.iter().map(|a| a.to_string()).collect(),
        email_address: Some("billing@acme.io".into()),
        mobile_number: Some("555-0100".into()),
        ttl: None,
    }
}

fn target() -> TargetRecord {
    TargetRecord {
        pk: "TENANT#acme".into(),
        organization: "Acme".into(),
        subscription_type: SubscriptionTier::Enterprise,
        website: Some("https://acme.io".into()),
        ttl: None,
    }
}

async fn seeded() -> Result<AccessLayer> {
    let (layer, _engine) = AccessLayer::in_memory(&AccessLayerConfig::default())?;
    layer
        .tenants
        .create_authorization_record(&admin_record(&["Alice", "Bob"]))
        .await?;
    layer.tenants.create_target(&target()).await?;
    Ok(layer)
}

#[tokio::test]
async fn test_non_member_cannot_delete() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    let err = layer
        .tenants
        .delete_with_authorization(&target().key(), &auth_key, "Carol")
        .await
        .unwrap_err();
    assert!(matches!(
        &err,
        AccessError::AuthorizationFailure { identity, .. } if identity == "Carol"
    ));
    assert!(!err.is_retryable());

    let still_there = layer.tenants.get_target(&target().key()).await?;
    assert_eq!(still_there, target());

    Ok(())
}

#[tokio::test]
async fn test_member_deletes_target() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    layer
        .tenants
        .delete_with_authorization(&target().key(), &auth_key, "Alice")
        .await?;

    let err = layer.tenant_records.fetch_consistent(&target().key()).await;
    assert!(matches!(err, Err(AccessError::NotFound { .. })));

    // The authorization record is untouched.
    let auth = layer.tenants.get_authorization_record(&auth_key).await?;
    assert_eq!(auth.admins, ["Alice", "Bob"]);

    Ok(())
}

#[tokio::test]
async fn test_missing_authorization_record_denies() -> Result<()> {
    let layer = seeded().await?;
    let err = layer
        .tenants
        .delete_with_authorization(&target().key(), &Key::string("pk", "ADMIN#ghost"), "Alice")
        .await;
    assert!(matches!(err, Err(AccessError::AuthorizationFailure { .. })));
    assert!(layer.tenants.get_target(&target().key()).await.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_delete_input_validation() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    let empty_identity = layer
        .tenants
        .delete_with_authorization(&target().key(), &auth_key, "")
        .await;
    assert!(matches!(empty_identity, Err(AccessError::Validation(_))));

    let same_item = layer
        .tenants
        .delete_with_authorization(&auth_key, &auth_key, "Alice")
        .await;
    assert!(matches!(same_item, Err(AccessError::Validation(_))));

    Ok(())
}

#[tokio::test]
async fn test_engine_failure_is_not_an_authorization_failure() -> Result<()> {
    let (layer, engine) = AccessLayer::in_memory(&AccessLayerConfig::default())?;
    engine.fail_on(
        EngineOp::TransactWrite,
        None,
        EngineError::Throttled("conflict".into()),
    );
    let err = layer
        .tenants
        .delete_with_authorization(&target().key(), &admin_record(&[]).key(), "Alice")
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Engine(EngineError::Throttled(_))));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_update_touches_only_supplied_attributes() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    layer
        .tenants
        .update_authorization_set(&auth_key, &["Dave".to_string()], None, Some("555-0199"))
        .await?;

    let auth = layer.tenants.get_authorization_record(&auth_key).await?;
    assert_eq!(auth.admins, ["Alice", "Bob", "Dave"]);
    assert_eq!(auth.mobile_number.as_deref(), Some("555-0199"));
    assert_eq!(auth.email_address.as_deref(), Some("billing@acme.io"));
    assert_eq!(auth.organization, "Acme");

    layer
        .tenants
        .update_authorization_set(&auth_key, &[], Some("ops@acme.io"), None)
        .await?;
    let auth = layer.tenants.get_authorization_record(&auth_key).await?;
    assert_eq!(auth.email_address.as_deref(), Some("ops@acme.io"));
    assert_eq!(auth.admins.len(), 3);

    Ok(())
}

#[tokio::test]
async fn test_update_without_clauses_is_rejected() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    let err = layer
        .tenants
        .update_authorization_set(&auth_key, &[], Some(""), None)
        .await;
    assert!(matches!(err, Err(AccessError::Validation(_))));

    let err = layer.tenants.remove_from_authorization_set(&auth_key, &[]).await;
    assert!(matches!(err, Err(AccessError::Validation(_))));

    Ok(())
}

#[tokio::test]
async fn test_phone_update_requires_existing_phone_map() -> Result<()> {
    let (layer, _engine) = AccessLayer::in_memory(&AccessLayerConfig::default())?;
    let record = AuthorizationRecord {
        mobile_number: None,
        ..admin_record(&["Alice"])
    };
    layer.tenants.create_authorization_record(&record).await?;

    let err = layer
        .tenants
        .update_authorization_set(&record.key(), &["Bob".to_string()], None, Some("555-0101"))
        .await
        .unwrap_err();
    assert!(matches!(err, AccessError::Engine(EngineError::Validation(_))));

    // The whole update is rejected, including the set addition.
    let stored = layer.tenants.get_authorization_record(&record.key()).await?;
    assert_eq!(stored.admins, ["Alice"]);

    Ok(())
}

#[tokio::test]
async fn test_remove_members() -> Result<()> {
    let layer = seeded().await?;
    let auth_key = admin_record(&[]).key();

    layer
        .tenants
        .remove_from_authorization_set(&auth_key, &["Bob".to_string(), "Zed".to_string()])
        .await?;
    let auth = layer.tenants.get_authorization_record(&auth_key).await?;
    assert_eq!(auth.admins, ["Alice"]);
    assert!(auth.is_admin("Alice"));
    assert!(!auth.is_admin("Bob"));

    layer
        .tenants
        .remove_from_authorization_set(&auth_key, &["Alice".to_string()])
        .await?;
    let auth = layer.tenants.get_authorization_record(&auth_key).await?;
    assert!(auth.admins.is_empty());

    // With nobody left, every delete is denied.
    let err = layer
        .tenants
        .delete_with_authorization(&target().key(), &auth_key, "Alice")
        .await;
    assert!(matches!(err, Err(AccessError::AuthorizationFailure { .. })));

    Ok(())
}

#[tokio::test]
async fn test_records_are_created_once() -> Result<()> {
    let layer = seeded().await?;

    let err = layer
        .tenants
        .create_authorization_record(&admin_record(&["Mallory"]))
        .await;
    assert!(matches!(err, Err(AccessError::AlreadyExists { .. })));

    let auth = layer
        .tenants
        .get_authorization_record(&admin_record(&[]).key())
        .await?;
    assert_eq!(auth.admins, ["Alice", "Bob"]);

    let missing = layer
        .tenants
        .get_authorization_record(&Key::string("pk", "ADMIN#nobody"))
        .await;
    assert!(matches!(missing, Err(AccessError::NotFound { .. })));

    Ok(())
}
