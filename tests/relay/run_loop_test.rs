//! End-to-end relay runs against the scripted platform.

use std::collections::HashMap;
use std::sync::Arc;

use channel_relay::config::{
    Config, ConfigError, RelayConfig, ENV_API_HASH, ENV_API_ID, ENV_DESTINATION, ENV_SESSION,
    ENV_SOURCE,
};
use channel_relay::platform::{ChannelRef, LookupQuery, PlatformError};
use channel_relay::relay::resolver::ResolutionError;
use channel_relay::relay::{Relay, RelayError};

use crate::mock::{capture_logs, channel, message, Call, ScriptedPlatform};

const NEWS_ID: i64 = -1_009_999;
const DEST_ID: i64 = -1_001_234_567_890;

fn channels() -> RelayConfig {
    RelayConfig {
        source: "@news".to_owned(),
        destination: "-1001234567890".to_owned(),
    }
}

fn news_platform() -> ScriptedPlatform {
    ScriptedPlatform::new()
        .with_channel(LookupQuery::Handle("@news".to_owned()), channel(NEWS_ID, "News"))
        .with_channel(LookupQuery::Id(DEST_ID), ChannelRef::from_id(DEST_ID))
}

#[tokio::test]
async fn hello_from_news_is_relayed_to_destination() {
    let (logs, _guard) = capture_logs();
    let platform = Arc::new(news_platform().with_events(vec![message(NEWS_ID, 11, "hello")]));

    let summary = Relay::new(Arc::clone(&platform), &channels()).run().await;

    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => panic!("relay should finish cleanly: {e}"),
    };
    assert_eq!(summary.source.id, NEWS_ID);
    assert_eq!(summary.stats.matched, 1);
    assert_eq!(summary.stats.handled, 1);

    assert_eq!(platform.lookups_of(&LookupQuery::Handle("@news".to_owned())), 1);
    assert_eq!(platform.lookups_of(&LookupQuery::Id(DEST_ID)), 1);
    assert_eq!(
        platform.sends(),
        vec![Call::Send {
            destination: DEST_ID,
            message_id: 11,
            text: Some("hello".to_owned()),
        }]
    );

    let output = logs.contents();
    assert!(output.contains("new message received"), "logs: {output}");
    assert!(output.contains("message forwarded"), "logs: {output}");
    // Lines from the forward worker carry the relay's channel pair.
    assert!(
        output
            .lines()
            .any(|l| l.contains("message forwarded")
                && l.contains("relay{source=@news destination=-1001234567890}")),
        "logs: {output}"
    );
}

#[tokio::test]
async fn calls_happen_in_startup_order() {
    let platform = Arc::new(news_platform().with_events(vec![]));

    let result = Relay::new(Arc::clone(&platform), &channels()).run().await;

    assert!(result.is_ok());
    assert_eq!(
        platform.calls(),
        vec![
            Call::Connect,
            Call::Lookup(LookupQuery::Handle("@news".to_owned())),
            Call::Run,
        ]
    );
}

#[tokio::test]
async fn live_events_are_relayed_while_running() {
    let platform = Arc::new(news_platform());
    let feed = platform.feed();
    let relay = Relay::new(Arc::clone(&platform), &channels());

    let producer = async move {
        for id in 1..=3 {
            assert!(feed.send(message(NEWS_ID, id, "live")).is_ok());
            tokio::task::yield_now().await;
        }
    };
    let (result, ()) = tokio::join!(relay.run(), producer);

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => panic!("relay should end when the feed closes: {e}"),
    };
    assert_eq!(summary.stats.handled, 3);
    assert_eq!(platform.sends().len(), 3);
}

#[tokio::test]
async fn rejected_session_stops_before_any_lookup() {
    let platform = Arc::new(
        news_platform()
            .with_connect_error(PlatformError::Unauthorized("invalid token".to_owned()))
            .with_events(vec![]),
    );

    let result = Relay::new(Arc::clone(&platform), &channels()).run().await;

    assert!(matches!(
        result,
        Err(RelayError::Connect(PlatformError::Unauthorized(_)))
    ));
    assert_eq!(platform.calls(), vec![Call::Connect]);
}

#[tokio::test]
async fn unresolvable_source_is_fatal_and_nothing_is_subscribed() {
    let platform = Arc::new(
        ScriptedPlatform::new()
            .with_channel(LookupQuery::Id(DEST_ID), ChannelRef::from_id(DEST_ID))
            .with_events(vec![message(NEWS_ID, 1, "never seen")]),
    );

    let result = Relay::new(Arc::clone(&platform), &channels()).run().await;

    assert!(matches!(
        result,
        Err(RelayError::Subscribe(ResolutionError::Lookup { .. }))
    ));
    assert!(!platform.calls().contains(&Call::Run));
    assert!(platform.sends().is_empty());
}

#[tokio::test]
async fn per_message_failures_do_not_stop_the_relay() {
    let platform = Arc::new(
        news_platform()
            .with_sends(vec![Err(PlatformError::Forbidden("no rights".to_owned()))])
            .with_events(vec![
                message(NEWS_ID, 1, "dropped"),
                message(-42, 2, "other chat"),
                message(NEWS_ID, 3, "delivered"),
            ]),
    );

    let result = Relay::new(Arc::clone(&platform), &channels()).run().await;

    let summary = match result {
        Ok(summary) => summary,
        Err(e) => panic!("relay should keep running: {e}"),
    };
    assert_eq!(summary.stats.matched, 2);
    assert_eq!(summary.stats.ignored, 1);
    assert_eq!(summary.stats.handled, 2);
    assert_eq!(platform.sends().len(), 2);
}

#[tokio::test]
async fn lost_connection_ends_the_run_with_an_error() {
    let platform = Arc::new(
        news_platform()
            .with_disconnect_error(PlatformError::Disconnected("network down".to_owned()))
            .with_events(vec![message(NEWS_ID, 1, "last one")]),
    );

    let result = Relay::new(Arc::clone(&platform), &channels()).run().await;

    assert!(matches!(
        result,
        Err(RelayError::Connection(PlatformError::Disconnected(_)))
    ));
    // Messages received before the drop are still relayed.
    assert_eq!(platform.sends().len(), 1);
}

#[test]
fn missing_session_token_fails_before_any_platform_call() {
    let env: HashMap<&str, &str> = HashMap::from([
        (ENV_API_ID, "12345"),
        (ENV_API_HASH, "0123456789abcdef"),
        (ENV_SOURCE, "@news"),
        (ENV_DESTINATION, "-1001234567890"),
    ]);
    let platform = Arc::new(news_platform().with_events(vec![]));

    let relay = Config::from_env_with(|key| env.get(key).map(|v| (*v).to_owned()))
        .map(|config| Relay::new(Arc::clone(&platform), &config.relay));

    assert!(matches!(relay, Err(ConfigError::Missing(ENV_SESSION))));
    assert!(platform.calls().is_empty());
}
