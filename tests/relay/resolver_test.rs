//! Entity resolver routing and failure tests.

use std::sync::Arc;

use channel_relay::platform::{ChannelRef, LookupQuery, PlatformError};
use channel_relay::relay::resolver::{ChannelIdentifier, EntityResolver, ResolutionError};

use crate::mock::{channel, Call, ScriptedPlatform};

#[tokio::test]
async fn handle_is_looked_up_as_string() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .with_channel(LookupQuery::Handle("@news".to_owned()), channel(-1001, "News")),
    );
    let resolver = EntityResolver::new(Arc::clone(&platform));

    let resolved = resolver.resolve(&ChannelIdentifier::new("@news")).await;

    assert!(matches!(resolved, Ok(ref c) if c.id == -1001));
    assert_eq!(
        platform.calls(),
        vec![Call::Lookup(LookupQuery::Handle("@news".to_owned()))]
    );
}

#[tokio::test]
async fn signed_numeric_id_is_looked_up_as_integer() {
    let platform = Arc::new(ScriptedPlatform::new().with_channel(
        LookupQuery::Id(-1_001_234_567_890),
        ChannelRef::from_id(-1_001_234_567_890),
    ));
    let resolver = EntityResolver::new(Arc::clone(&platform));

    let resolved = resolver
        .resolve(&ChannelIdentifier::new("-1001234567890"))
        .await;

    assert!(resolved.is_ok());
    assert_eq!(
        platform.calls(),
        vec![Call::Lookup(LookupQuery::Id(-1_001_234_567_890))]
    );
}

#[tokio::test]
async fn unsigned_numeric_id_is_looked_up_as_integer() {
    let platform = Arc::new(
        ScriptedPlatform::new().with_channel(LookupQuery::Id(777_000), ChannelRef::from_id(777_000)),
    );
    let resolver = EntityResolver::new(Arc::clone(&platform));

    assert!(resolver.resolve(&ChannelIdentifier::new("777000")).await.is_ok());
    assert_eq!(platform.calls(), vec![Call::Lookup(LookupQuery::Id(777_000))]);
}

#[tokio::test]
async fn free_form_string_is_looked_up_verbatim() {
    let platform = Arc::new(ScriptedPlatform::new().with_channel(
        LookupQuery::Name("Daily News".to_owned()),
        channel(-300, "Daily News"),
    ));
    let resolver = EntityResolver::new(Arc::clone(&platform));

    let resolved = resolver.resolve(&ChannelIdentifier::new("Daily News")).await;

    assert!(matches!(resolved, Ok(ref c) if c.label() == "Daily News"));
    assert_eq!(
        platform.calls(),
        vec![Call::Lookup(LookupQuery::Name("Daily News".to_owned()))]
    );
}

#[tokio::test]
async fn lookup_failure_is_reported_once_without_retry() {
    let query = LookupQuery::Handle("@gone".to_owned());
    let platform = Arc::new(ScriptedPlatform::new().with_lookups(
        query.clone(),
        vec![Err(PlatformError::Forbidden("bot was kicked".to_owned()))],
    ));
    let resolver = EntityResolver::new(Arc::clone(&platform));

    let result = resolver.resolve(&ChannelIdentifier::new("@gone")).await;

    match result {
        Err(ResolutionError::Lookup { identifier, source }) => {
            assert_eq!(identifier, "@gone");
            assert!(matches!(source, PlatformError::Forbidden(_)));
        }
        other => panic!("expected lookup failure, got {other:?}"),
    }
    assert_eq!(platform.lookups_of(&query), 1);
}

#[tokio::test]
async fn malformed_identifier_never_reaches_platform() {
    let platform = Arc::new(ScriptedPlatform::new());
    let resolver = EntityResolver::new(Arc::clone(&platform));

    let result = resolver.resolve(&ChannelIdentifier::new("@")).await;

    assert!(matches!(result, Err(ResolutionError::Malformed { .. })));
    assert!(platform.calls().is_empty());
}
