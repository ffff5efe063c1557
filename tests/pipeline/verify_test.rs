//! Subscription verification handshake.

use std::sync::Arc;

use leadflow::config::Config;
use leadflow::leads::Channel;
use leadflow::outbound::Transports;
use leadflow::pipeline::router::{EventRouter, VerifyQuery};
use leadflow::pipeline::PipelineError;

use crate::common::FailingStore;

fn router() -> EventRouter {
    let mut config = Config::default();
    config.channels.instagram.verify_token = Some("s3cret".to_owned());
    config.channels.whatsapp.verify_token = Some("wa-token".to_owned());
    config.channels.whatsapp.enabled = false;
    // The store is never touched by verification.
    EventRouter::new(&config, Arc::new(FailingStore), Transports::new())
}

fn query(mode: Option<&str>, token: Option<&str>, challenge: Option<&str>) -> VerifyQuery {
    VerifyQuery {
        mode: mode.map(str::to_owned),
        verify_token: token.map(str::to_owned),
        challenge: challenge.map(str::to_owned),
    }
}

#[test]
fn matching_token_echoes_challenge() {
    let challenge = router()
        .verify(
            Channel::Instagram,
            &query(Some("subscribe"), Some("s3cret"), Some("1158201444")),
        )
        .expect("should verify");
    assert_eq!(challenge, "1158201444");
}

#[test]
fn wrong_token_is_rejected() {
    let err = router()
        .verify(
            Channel::Instagram,
            &query(Some("subscribe"), Some("guess"), Some("x")),
        )
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::VerificationMismatch));
}

#[test]
fn wrong_mode_is_rejected() {
    let err = router()
        .verify(
            Channel::Instagram,
            &query(Some("unsubscribe"), Some("s3cret"), Some("x")),
        )
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::VerificationMismatch));
}

#[test]
fn missing_parameters_are_reported() {
    let router = router();
    let err = router
        .verify(Channel::Instagram, &query(None, Some("s3cret"), Some("x")))
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::MissingVerificationParams("hub.mode")));

    let err = router
        .verify(Channel::Instagram, &query(Some("subscribe"), None, Some("x")))
        .expect_err("should reject");
    assert!(matches!(
        err,
        PipelineError::MissingVerificationParams("hub.verify_token")
    ));
}

#[test]
fn channel_without_token_never_verifies() {
    let err = router()
        .verify(
            Channel::Facebook,
            &query(Some("subscribe"), Some(""), Some("x")),
        )
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::VerificationMismatch));
}

#[test]
fn disabled_channel_never_verifies() {
    let err = router()
        .verify(
            Channel::Whatsapp,
            &query(Some("subscribe"), Some("wa-token"), Some("x")),
        )
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::VerificationMismatch));
}

#[test]
fn tokens_are_per_channel() {
    let err = router()
        .verify(
            Channel::Facebook,
            &query(Some("subscribe"), Some("s3cret"), Some("x")),
        )
        .expect_err("should reject");
    assert!(matches!(err, PipelineError::VerificationMismatch));
}
