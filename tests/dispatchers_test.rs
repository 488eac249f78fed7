//! Wire shapes of the three dispatch targets.

mod common;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pennysync::error::SyncError;
use pennysync::models::{PaymentClass, PaymentEvent};
use pennysync::services::ledger::LedgerFields;
use pennysync::services::tempo::Settlement;

fn event(class: PaymentClass, paid: i64) -> PaymentEvent {
    PaymentEvent {
        invoice_id: "inv-7".to_string(),
        reference: Some(20498),
        client_name: "EURO DISNEY ASSOCIES SAS".to_string(),
        total_amount: Decimal::from(1000),
        paid_amount: Decimal::from(paid),
        fraction: Decimal::ONE,
        class,
        event_date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
    }
}

fn run_time() -> chrono::NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

// =============================================================================
// Tempo
// =============================================================================

#[tokio::test]
async fn test_tempo_full_settlement_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/FACTUREREGLEMENT"))
        .and(query_param("Dossier", "D01"))
        .and(header("Authorization", common::TEMPO_BASIC_AUTH))
        .and(body_json(json!({
            "IdFacture": 20498,
            "RegleeTotale": "OUI",
            "DateReglementTotal": "20261019"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let settlement = common::tempo(&server.uri())
        .try_dispatch(&event(PaymentClass::Full, 1000))
        .await
        .unwrap();
    assert_eq!(
        settlement,
        Settlement::Full {
            date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
        }
    );
}

#[tokio::test]
async fn test_tempo_partial_fixes_cumulative_total() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/FACTUREREGLEMENT"))
        .and(body_json(json!({
            "IdFacture": 20498,
            "MontantReglementPartielTotal": 600.0,
            "DateReglementTotal": "20261019"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    assert!(
        common::tempo(&server.uri())
            .dispatch(&event(PaymentClass::Partial, 600))
            .await
    );
}

#[tokio::test]
async fn test_tempo_rejection_is_a_failed_dispatch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/FACTUREREGLEMENT"))
        .respond_with(ResponseTemplate::new(400).set_body_string("Facture verrouillée"))
        .expect(1)
        .mount(&server)
        .await;

    let client = common::tempo(&server.uri());
    let err = client
        .try_dispatch(&event(PaymentClass::Full, 1000))
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 400, .. }));
}

#[tokio::test]
async fn test_tempo_missing_reference_never_calls_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut anonymous = event(PaymentClass::Full, 1000);
    anonymous.reference = None;
    let client = common::tempo(&server.uri());
    assert!(!client.dispatch(&anonymous).await);
    let err = client.try_dispatch(&anonymous).await.unwrap_err();
    assert!(err.is_business());
}

#[tokio::test]
async fn test_tempo_invoice_lookup() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/FACTURE"))
        .and(query_param("Dossier", "D01"))
        .and(query_param("ID", "20498"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ID": 20498, "RegleeTotale": "OUI"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/FACTURE"))
        .and(query_param("ID", "1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = common::tempo(&server.uri());
    let found = client.get_invoice(20498).await.unwrap().unwrap();
    assert_eq!(found["RegleeTotale"], "OUI");
    assert!(client.get_invoice(1).await.unwrap().is_none());
}

// =============================================================================
// Armado
// =============================================================================

#[tokio::test]
async fn test_armado_lookup_then_update() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/bill"))
        .and(query_param("reference", "20498"))
        .and(header("ApiKey", "ar-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 77, "reference": "20498"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/bill/77"))
        .and(body_json(json!({
            "paymentType": 2,
            "paymentDate": "2026-10-19T12:00:00.000000"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": 77})))
        .expect(1)
        .mount(&server)
        .await;

    let bill_id = common::armado(&server.uri())
        .try_dispatch(&event(PaymentClass::Full, 1000), run_time())
        .await
        .unwrap();
    assert_eq!(bill_id, 77);
}

#[tokio::test]
async fn test_armado_empty_lookup_is_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/bill"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = common::armado(&server.uri());
    assert_eq!(client.find_bill_id_by_reference("20498").await.unwrap(), None);
    let err = client
        .try_dispatch(&event(PaymentClass::Full, 1000), run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::NotFound { .. }));
    assert!(err.is_business());
}

#[tokio::test]
async fn test_armado_404_on_lookup_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/bill"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = common::armado(&server.uri())
        .find_bill_id_by_reference("20498")
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Status { status: 404, .. }));
}

#[tokio::test]
async fn test_armado_validation_message_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/bill"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 5}])))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/bill/5"))
        .respond_with(
            ResponseTemplate::new(422).set_body_json(json!({"message": "paymentDate is invalid"})),
        )
        .mount(&server)
        .await;

    let err = common::armado(&server.uri())
        .sync_payment("20498", "cb", run_time())
        .await
        .unwrap_err();
    match err {
        SyncError::Validation { message, .. } => assert_eq!(message, "paymentDate is invalid"),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_armado_unknown_mode_fails_before_any_request() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = common::armado(&server.uri())
        .sync_payment("20498", "bitcoin", run_time())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::UnknownMode(_)));
    assert!(err.to_string().contains("virement"));
}

#[tokio::test]
async fn test_armado_connection_probe() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/bill"))
        .and(query_param("reference", "TEST_CONNECTION_12345"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(common::armado(&server.uri()).test_connection().await.is_ok());
}

#[tokio::test]
async fn test_armado_bad_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = common::armado(&server.uri()).test_connection().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized { target: "armado" }));
}

// =============================================================================
// Sheets ledger
// =============================================================================

async fn mount_ledger_writes(server: &MockServer, row: usize) {
    Mock::given(method("PUT"))
        .and(path(format!("/v4/spreadsheets/sheet-1/values/Suivi!A{}:H{}", row, row)))
        .and(query_param("valueInputOption", "RAW"))
        .and(header("Authorization", "Bearer sheets-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v4/spreadsheets/sheet-1/values/Suivi!J{}", row)))
        .and(body_partial_json(json!({"values": [["EURO DISNEY ASSOCIES SAS"]]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path(format!("/v4/spreadsheets/sheet-1/values/Suivi!L{}", row)))
        .and(body_partial_json(json!({"values": [["20498"]]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_ledger_appends_after_last_row() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/sheet-1/values/Suivi!A:A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "range": "Suivi!A1:A3",
            "values": [["ID"], ["a"], ["b"]]
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_ledger_writes(&server, 4).await;

    let fields = LedgerFields {
        client_name: "EURO DISNEY ASSOCIES SAS".to_string(),
        invoice_date: Some("2026-09-30".to_string()),
    };
    let row = common::ledger(&server.uri())
        .try_dispatch(&event(PaymentClass::Full, 1000), &fields, run_time())
        .await
        .unwrap();
    assert_eq!(row, 4);
}

#[tokio::test]
async fn test_ledger_recovers_from_one_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/sheet-1/values/Suivi!A:A"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v4/spreadsheets/sheet-1/values/Suivi!A:A"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    mount_ledger_writes(&server, 1).await;

    let fields = LedgerFields {
        client_name: "EURO DISNEY ASSOCIES SAS".to_string(),
        invoice_date: None,
    };
    assert!(
        common::ledger(&server.uri())
            .dispatch(&event(PaymentClass::Full, 1000), &fields, run_time())
            .await
    );
}

#[tokio::test]
async fn test_ledger_gives_up_after_second_rate_limit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .expect(2)
        .mount(&server)
        .await;

    let err = common::ledger(&server.uri())
        .try_dispatch(
            &event(PaymentClass::Partial, 400),
            &LedgerFields::default(),
            run_time(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::RateLimited { target: "sheets" }));
}
