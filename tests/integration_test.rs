//! Integration tests for the XNRT platform backend
//!
//! These tests require the backend server to be running on localhost:8080
//! Start it with `cargo run` before running tests

use reqwest;
use serde_json::json;
use std::time::Duration;

const BASE_URL: &str = "http://localhost:8080";

async fn check_server_available() -> bool {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();

    client
        .get(&format!("{}/health", BASE_URL))
        .send()
        .await
        .is_ok()
}

macro_rules! require_server {
    () => {
        if !check_server_available().await {
            eprintln!("\n⚠️  Backend server is not running on {}", BASE_URL);
            eprintln!("   Start the server with: cargo run");
            eprintln!("   Then run tests with: cargo test --test integration_test\n");
            return;
        }
    };
}

fn unique_tx_hash() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("0x{:064x}", nanos)
}

fn unique_username(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .subsec_nanos();
    format!("{}_{}", prefix, nanos)
}

async fn register(client: &reqwest::Client, username: &str) -> serde_json::Value {
    let response = client
        .post(&format!("{}/auth/register", BASE_URL))
        .json(&json!({ "username": username }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);
    response.json().await.expect("Failed to parse JSON")
}

#[tokio::test]
async fn test_health_check() {
    require_server!();

    let client = reqwest::Client::new();

    let response = client
        .get(&format!("{}/health", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

#[tokio::test]
async fn test_staking_tiers_are_public() {
    require_server!();

    let client = reqwest::Client::new();

    let response = client
        .get(&format!("{}/staking/tiers", BASE_URL))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);

    let tiers: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let tiers = tiers.as_array().expect("tiers should be an array");
    assert_eq!(tiers.len(), 4);
    assert_eq!(tiers[0]["name"], "Sapphire");
    assert_eq!(tiers[3]["name"], "Imperial Diamond");
}

#[tokio::test]
async fn test_register_and_fetch_balance() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_user");

    let body = register(&client, &username).await;

    let token = body["api_token"].as_str().expect("token missing");
    assert_eq!(token.len(), 64);
    assert_eq!(body["user"]["username"], username.as_str());
    assert!(body["user"]["referral_code"].as_str().unwrap().len() == 8);
    assert!(body["user"]["deposit_address"]
        .as_str()
        .unwrap()
        .starts_with("0x"));
    // the token must never appear inside the serialized user
    assert!(body["user"].get("api_token").is_none());

    let response = client
        .get(&format!("{}/balance", BASE_URL))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 200);

    let balance: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(balance["main"], "0");
    assert_eq!(balance["staking"], "0");
    assert_eq!(balance["mining"], "0");
    assert_eq!(balance["referral"], "0");
}

#[tokio::test]
async fn test_register_rejects_bad_usernames() {
    require_server!();

    let client = reqwest::Client::new();

    for bad in ["ab", "has space", "semi;colon"] {
        let response = client
            .post(&format!("{}/auth/register", BASE_URL))
            .json(&json!({ "username": bad }))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 400, "username {:?} should be rejected", bad);
    }
}

#[tokio::test]
async fn test_register_rejects_unknown_referral_code() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_ref");

    let response = client
        .post(&format!("{}/auth/register", BASE_URL))
        .json(&json!({ "username": username, "referral_code": "NOPE0000" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    require_server!();

    let client = reqwest::Client::new();

    for path in ["/balance", "/deposits", "/staking/stakes", "/withdrawals", "/referrals"] {
        let response = client
            .get(&format!("{}{}", BASE_URL, path))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), 401, "{} should require a token", path);
    }

    let response = client
        .get(&format!("{}/balance", BASE_URL))
        .bearer_auth("not-a-real-token")
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_admin_routes_reject_regular_users() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_adm");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();

    let response = client
        .get(&format!("{}/admin/deposits/pending", BASE_URL))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn test_wallet_challenge_requires_valid_address() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_wal");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/wallet/challenge", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "address": "not-an-address" }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);

    let error: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(error["error"], "validation_error");
}

#[tokio::test]
async fn test_wallet_challenge_issue_and_bad_signature() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_sig");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();
    let address = "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0";

    let response = client
        .post(&format!("{}/wallet/challenge", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "address": address }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 200);

    let challenge: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    let nonce = challenge["nonce"].as_str().expect("nonce missing");
    assert!(challenge["message"]
        .as_str()
        .unwrap()
        .contains(address));

    // a signature from a random key must not link the wallet
    let response = client
        .post(&format!("{}/wallet/confirm", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "address": address,
            "nonce": nonce,
            "signature": format!("0x{}", "11".repeat(65)),
        }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    let links: serde_json::Value = client
        .get(&format!("{}/wallet/links", BASE_URL))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(links.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_stake_rejects_unknown_tier_and_empty_balance() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_stk");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/staking/stakes", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "tier": "Obsidian", "amount": "1000" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    // valid tier, but a fresh account has nothing to stake
    let response = client
        .post(&format!("{}/staking/stakes", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "tier": "Sapphire", "amount": "1000" }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 400);

    let error: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(error["error"], "insufficient_balance");
}

#[tokio::test]
async fn test_withdrawal_minimums_are_enforced() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_wd");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/withdrawals", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "source": "main",
            "amount": "100",
            "destination_address": "0xa1b2c3d4e5f6a7b8c9d0e1f2a3b4c5d6e7f8a9b0",
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 400);

    let error: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(error["error"], "validation_error");
}

#[tokio::test]
async fn test_same_tx_hash_is_accepted_exactly_once() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_dup");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();
    let tx_hash = unique_tx_hash();

    let response = client
        .post(&format!("{}/deposits/report", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "amount": "100", "tx_hash": tx_hash }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 201);

    // the same hash again must not create a second record
    let response = client
        .post(&format!("{}/deposits/report", BASE_URL))
        .bearer_auth(token)
        .json(&json!({ "amount": "100", "tx_hash": tx_hash }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 409);

    let error: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(error["error"], "conflict");

    // hash uniqueness is platform-wide, not per user
    let other = register(&client, &unique_username("it_dup2")).await;
    let other_token = other["api_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/deposits/report", BASE_URL))
        .bearer_auth(other_token)
        .json(&json!({ "amount": "100", "tx_hash": tx_hash }))
        .send()
        .await
        .expect("Failed to send request");
    assert_eq!(response.status(), 409);

    let deposits: serde_json::Value = client
        .get(&format!("{}/deposits", BASE_URL))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(deposits.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_deposit_report_without_hash_goes_to_investigation() {
    require_server!();

    let client = reqwest::Client::new();
    let username = unique_username("it_dep");
    let body = register(&client, &username).await;
    let token = body["api_token"].as_str().unwrap();

    let response = client
        .post(&format!("{}/deposits/report", BASE_URL))
        .bearer_auth(token)
        .json(&json!({
            "amount": "250",
            "description": "sent from my exchange account",
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), 201);

    let report: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(report["outcome"], "submitted_for_investigation");
    assert_eq!(report["deposit"]["status"], "pending");
    assert_eq!(report["deposit"]["source"], "manual");

    let deposits: serde_json::Value = client
        .get(&format!("{}/deposits", BASE_URL))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to send request")
        .json()
        .await
        .expect("Failed to parse JSON");
    assert_eq!(deposits.as_array().unwrap().len(), 1);
}
