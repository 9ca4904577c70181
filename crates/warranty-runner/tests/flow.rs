//! Flow tests against the scripted page in `common`.
//!
//! Run with: cargo test --test flow

mod common;

use common::{selector_for, strategy, test_config, FakePage, Reaction};
use warranty_retention::RetentionTracker;
use warranty_runner::names::*;
use warranty_runner::{
    Customer, Dealer, ErrorKind, FlowState, FormFiller, LocateOptions, Locator, Product,
    RegistrationFlow, RegistrationRequest, Runner, TypeOptions,
};

fn request(serials: &[&str]) -> RegistrationRequest {
    RegistrationRequest {
        products: serials
            .iter()
            .map(|s| Product {
                serial: s.to_string(),
                model: "xr-15".into(),
            })
            .collect(),
        installation_date: "03/14/2025".into(),
        customer: Some(Customer {
            first_name: "Jane".into(),
            last_name: "McDoe".into(),
            phone: "555-0100".into(),
            email: "jane@example.com".into(),
            address1: "1 Main St".into(),
            zip_postal: "78701".into(),
            city: "Austin".into(),
            state_province: "tx".into(),
        }),
        dealer: Some(Dealer {
            dealer_zip: "78702".into(),
            dealer_name: "Cool Air Inc".into(),
            dealer_address: "".into(),
            dealer_city: "Austin".into(),
            dealer_state: "tx".into(),
            dealer_phone: "555-0199".into(),
        }),
    }
}

fn runner(dir: &std::path::Path) -> Runner {
    Runner::new(test_config(dir)).unwrap()
}

#[tokio::test]
async fn test_successful_run_saves_certificate() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let runner = runner(dir.path());

    let result = runner.drive(&page, &request(&["ab123"])).await;

    assert!(result.success, "run failed: {}", result.message);
    let cert = result.certificate.expect("certificate");
    assert!(!cert.filename.is_empty());
    assert!(cert.filename.starts_with("warranty-certificate-MCDOE-"));
    assert_eq!(
        std::fs::read(&cert.file_path).unwrap(),
        b"%PDF-1.7 certificate"
    );

    let tracker = RetentionTracker::with_hours(dir.path().join("certs"), 48).unwrap();
    let entries = tracker.entries().unwrap();
    let entry = entries.get(&cert.filename).expect("metadata entry");
    assert_eq!(entry.customer_label, "JANE MCDOE");
    assert_eq!(entry.product_count, 1);
    assert!(!entry.webhook_delivered);

    assert_eq!(page.url().as_deref(), Some("https://warranty.example.com/register"));
    assert!(page.captures().is_empty());
}

#[tokio::test]
async fn test_steps_run_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;
    assert!(result.success);

    let order = [
        format!("check {}=true", selector_for(REGISTERING_FOR_CUSTOMER)),
        format!("fill {}=AB123", selector_for(SERIAL_NUMBER)),
        format!("key {} Enter", selector_for(SERIAL_NUMBER)),
        format!("fill {}=03/14/2025", selector_for(INSTALLATION_DATE)),
        format!("click {}", selector_for(CONTINUE)),
        format!("fill {}=JANE", selector_for(FIRST_NAME)),
        format!("check {}=true", selector_for(CONSENT)),
        format!("key {} Enter", selector_for(DEALER_ZIP)),
        format!("blur {}", selector_for(DEALER_NAME)),
        format!("click {}", selector_for(REGISTER)),
        format!("click {}", selector_for(AFFIRM)),
        format!("click {}", selector_for(FINAL_YES)),
        "arm_download".to_string(),
        format!("click {}", selector_for(DOWNLOAD_CERTIFICATE)),
    ];
    let positions: Vec<usize> = order
        .iter()
        .map(|e| page.position(e).unwrap_or_else(|| panic!("missing event {}", e)))
        .collect();
    assert!(
        positions.windows(2).all(|w| w[0] < w[1]),
        "out of order: {:?}",
        positions
    );
}

#[tokio::test]
async fn test_free_text_is_uppercased() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;
    assert!(result.success);

    let writes: Vec<String> = page
        .events()
        .into_iter()
        .filter(|e| e.starts_with("fill ") || e.starts_with("select "))
        .collect();
    assert!(writes.len() >= 10);
    for write in &writes {
        let value = write.split_once('=').map(|(_, v)| v).unwrap_or("");
        assert_eq!(value, value.to_uppercase(), "not uppercased: {}", write);
    }
    assert_eq!(page.value(&selector_for(EMAIL)), "JANE@EXAMPLE.COM");
    assert_eq!(page.value(&selector_for(DEALER_NAME)), "COOL AIR INC");
}

#[tokio::test]
async fn test_already_registered_halts_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    page.on_key(
        &selector_for(SERIAL_NUMBER),
        vec![Reaction::Show(selector_for(ALREADY_REGISTERED_NOTICE))],
    );

    let result = runner(dir.path())
        .drive(&page, &request(&["ab123", "cd456"]))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::AlreadyRegistered));
    assert_eq!(result.error_code.as_deref(), Some("ALREADY_REGISTERED"));
    assert_eq!(result.details.as_deref(), Some("serial: AB123"));

    // the second product is never touched
    assert!(page.position(&format!("click {}", selector_for(ADD_PRODUCT))).is_none());
    assert!(page.events().iter().all(|e| !e.contains("CD456")));
    assert!(page.captures().contains(&"failed-products".to_string()));
}

#[tokio::test]
async fn test_invalid_serial_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    page.on_key(
        &selector_for(SERIAL_NUMBER),
        vec![Reaction::Show(selector_for(INVALID_SERIAL_NOTICE))],
    );

    let result = runner(dir.path()).drive(&page, &request(&["zz"])).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidSerial));
    assert_eq!(result.error_code.as_deref(), Some("INVALID_SERIAL"));
}

#[tokio::test]
async fn test_second_product_uses_new_row() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let result = runner(dir.path())
        .drive(&page, &request(&["ab123", "cd456"]))
        .await;

    assert!(result.success, "run failed: {}", result.message);
    assert_eq!(page.value(&selector_for(SERIAL_NUMBER)), "AB123");
    assert_eq!(page.value("#serial-number-2"), "CD456");
    let add = page
        .position(&format!("click {}", selector_for(ADD_PRODUCT)))
        .unwrap();
    let second = page.position("fill #serial-number-2=CD456").unwrap();
    assert!(add < second);
}

#[tokio::test]
async fn test_without_customer_stops_after_install_metadata() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let mut req = request(&["ab123"]);
    req.customer = None;
    req.dealer = None;

    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let mut flow = RegistrationFlow::new(&page, &table, &config);
    let outcome = flow.run(&req.normalized()).await.unwrap();

    assert_eq!(outcome.reached, FlowState::EnterInstallMetadata);
    assert!(outcome.certificate.is_none());
    assert!(page.checked(&selector_for(OWNER_OCCUPIED)));
    assert!(page.position(&format!("click {}", selector_for(NEXT))).is_none());

    let result = runner(dir.path()).drive(&FakePage::registration_form(), &req).await;
    assert!(result.success);
    assert!(result.certificate.is_none());
}

async fn run_with_dialogs(count: usize) -> (FakePage, bool) {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();

    // contractor -> address -> acknowledgement, each revealed by clearing the previous
    let chain = [
        (CONTRACTOR_DIALOG, CONTRACTOR_DISMISS),
        (ADDRESS_DIALOG, ADDRESS_CONFIRM),
        (ACK_DIALOG, ACK_OK),
    ];
    if count > 0 {
        let (dialog, button) = chain[0];
        page.on_click(
            &selector_for(FINAL_YES),
            vec![
                Reaction::Show(selector_for(dialog)),
                Reaction::Show(selector_for(button)),
            ],
        );
    }
    for i in 0..count {
        let (dialog, button) = chain[i];
        let mut reactions = vec![
            Reaction::Hide(selector_for(dialog)),
            Reaction::Hide(selector_for(button)),
        ];
        if dialog == CONTRACTOR_DIALOG {
            reactions.push(Reaction::OpenPopup);
        }
        if i + 1 < count {
            let (next_dialog, next_button) = chain[i + 1];
            reactions.push(Reaction::Show(selector_for(next_dialog)));
            reactions.push(Reaction::Show(selector_for(next_button)));
        }
        page.on_click(&selector_for(button), reactions);
    }

    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;
    (page, result.success)
}

#[tokio::test]
async fn test_no_dialog_costs_at_most_one_probe() {
    let (page, ok) = run_with_dialogs(0).await;
    assert!(ok);

    let yes = page
        .paused_at(&format!("click {}", selector_for(FINAL_YES)))
        .unwrap();
    let armed = page.paused_at("arm_download").unwrap();
    // probe_ms from test_config
    assert!(armed - yes <= 200, "waited {}ms for absent dialogs", armed - yes);
}

#[tokio::test]
async fn test_single_dialog_is_drained_before_download() {
    let (page, ok) = run_with_dialogs(1).await;
    assert!(ok);

    let dismiss = page
        .position(&format!("click {}", selector_for(CONTRACTOR_DISMISS)))
        .unwrap();
    let armed = page.position("arm_download").unwrap();
    assert!(dismiss < armed);
    // the contractor popup was closed, not followed
    assert_eq!(page.open_popups(), 0);
    assert!(page.position("close_popups 1").is_some());
}

#[tokio::test]
async fn test_chained_dialogs_are_drained_before_download() {
    let (page, ok) = run_with_dialogs(3).await;
    assert!(ok);

    let armed = page.position("arm_download").unwrap();
    for button in [CONTRACTOR_DISMISS, ADDRESS_CONFIRM, ACK_OK] {
        let clicked = page
            .position(&format!("click {}", selector_for(button)))
            .unwrap_or_else(|| panic!("{} never clicked", button));
        assert!(clicked < armed, "{} clicked after download armed", button);
    }
}

#[tokio::test]
async fn test_address_dialog_after_register_and_affirm() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let show = vec![
        Reaction::Show(selector_for(ADDRESS_DIALOG)),
        Reaction::Show(selector_for(ADDRESS_CONFIRM)),
    ];
    page.on_click(&selector_for(REGISTER), show.clone());
    page.on_click(&selector_for(AFFIRM), show);
    page.on_click(
        &selector_for(ADDRESS_CONFIRM),
        vec![
            Reaction::Hide(selector_for(ADDRESS_DIALOG)),
            Reaction::Hide(selector_for(ADDRESS_CONFIRM)),
        ],
    );

    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;
    assert!(result.success, "run failed: {}", result.message);

    let confirm = format!("click {}", selector_for(ADDRESS_CONFIRM));
    let confirms = page.events().iter().filter(|e| **e == confirm).count();
    assert_eq!(confirms, 2);
}

#[tokio::test]
async fn test_locator_falls_back_and_reports_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let page = FakePage::new();
    // only the placeholder strategy (index 2) matches
    page.add(&strategy(FIRST_NAME, 2), "#fname", "input");

    let locator = Locator::new(&page, &table, &config.timeouts);
    let located = locator
        .locate(FIRST_NAME, LocateOptions::new(config.timeouts.default_ms))
        .await
        .unwrap();

    assert_eq!(located.selector, "#fname");
    assert_eq!(located.strategy_index, 2);
    assert_eq!(located.strategy, table.get(FIRST_NAME).unwrap()[2]);
    assert!(!located.forced);
}

#[tokio::test]
async fn test_locator_skips_hidden_and_disabled_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let page = FakePage::new();
    page.add(&strategy(NEXT, 0), "#hidden-next", "button");
    page.update("#hidden-next", |el| el.visible = false);
    page.add(&strategy(NEXT, 1), "#disabled-next", "button");
    page.update("#disabled-next", |el| el.enabled = false);
    page.add(&strategy(NEXT, 2), "#real-next", "button");

    let locator = Locator::new(&page, &table, &config.timeouts);
    let located = locator
        .locate(NEXT, LocateOptions::new(config.timeouts.default_ms))
        .await
        .unwrap();
    assert_eq!(located.selector, "#real-next");
    assert_eq!(located.strategy_index, 2);
}

#[tokio::test]
async fn test_not_found_lists_every_strategy_and_captures() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    page.unbind(&strategy(CONTINUE, 0));

    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::NotFound));
    assert_eq!(result.error_code.as_deref(), Some("ELEMENT_NOT_FOUND"));
    let details = result.details.unwrap();
    for s in warranty_runner::SelectorTable::builtin()
        .get(CONTINUE)
        .unwrap()
    {
        assert!(details.contains(&s.to_string()), "{} not in {}", s, details);
    }
    assert!(page.captures().contains(&"not-found-continue".to_string()));
    // nothing past the failing step ran
    assert!(page.position(&format!("fill {}=JANE", selector_for(FIRST_NAME))).is_none());
}

#[tokio::test]
async fn test_occluded_click_is_forced() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let page = FakePage::new();
    page.add(&strategy(REGISTER, 0), "#register", "button");
    page.update("#register", |el| el.occluded = true);

    let filler = FormFiller::new(Locator::new(&page, &table, &config.timeouts));
    let located = filler.click(REGISTER, false).await.unwrap();

    assert!(located.forced);
    assert_eq!(located.strategy_index, 0);
    assert!(page.position("force click #register").is_some());
    assert!(page.position("click #register").is_none());
}

#[tokio::test]
async fn test_verify_rewrites_exactly_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let page = FakePage::new();
    page.add(&strategy(PHONE, 0), "#phone", "input");
    page.mangle_once("#phone");

    let filler = FormFiller::new(Locator::new(&page, &table, &config.timeouts));
    filler
        .type_text(PHONE, "5550100", TypeOptions::default())
        .await
        .unwrap();

    let writes = page
        .events()
        .iter()
        .filter(|e| e.as_str() == "fill #phone=5550100")
        .count();
    assert_eq!(writes, 2);
    assert_eq!(page.value("#phone"), "5550100");

    // writing the same value again leaves exactly that value
    filler
        .type_text(PHONE, "5550100", TypeOptions::default())
        .await
        .unwrap();
    assert_eq!(page.value("#phone"), "5550100");
}

#[tokio::test]
async fn test_verify_accepts_reformatted_value() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let table = config.selector_table().unwrap();
    let page = FakePage::new();
    page.add(&strategy(PHONE, 0), "#phone", "input");
    // a mask that always reformats
    page.on_write(
        "#phone",
        vec![Reaction::SetValue("#phone".into(), "(555) 010-0".into())],
    );

    let filler = FormFiller::new(Locator::new(&page, &table, &config.timeouts));
    filler
        .type_text(PHONE, "5550100", TypeOptions::default())
        .await
        .unwrap();

    let writes = page
        .events()
        .iter()
        .filter(|e| e.starts_with("fill #phone"))
        .count();
    assert_eq!(writes, 2);
    assert_eq!(page.value("#phone"), "(555) 010-0");
}

#[tokio::test]
async fn test_autofilled_city_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    page.on_write(
        &selector_for(ZIP),
        vec![Reaction::SetValue(selector_for(CITY), "AUSTIN CITY".into())],
    );

    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;
    assert!(result.success, "run failed: {}", result.message);

    assert_eq!(page.value(&selector_for(CITY)), "AUSTIN CITY");
    assert!(page
        .events()
        .iter()
        .all(|e| !e.starts_with(&format!("fill {}=", selector_for(CITY)))));
    // state was blank, so it is written (as a select)
    assert!(page
        .position(&format!("select {}=TX", selector_for(STATE)))
        .is_some());
}

#[tokio::test]
async fn test_invalid_request_never_touches_the_page() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    let req = request(&["   "]);

    let result = runner(dir.path()).drive(&page, &req).await;

    assert!(!result.success);
    assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
    assert!(page.events().is_empty());
}

#[tokio::test]
async fn test_overlay_whose_button_vanished_takes_no_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let page = FakePage::registration_form();
    // the dialog shows up, but its dismiss button is already gone
    page.on_click(
        &selector_for(FINAL_YES),
        vec![Reaction::Show(selector_for(CONTRACTOR_DIALOG))],
    );

    let result = runner(dir.path()).drive(&page, &request(&["ab123"])).await;

    assert!(result.success, "run failed: {}", result.message);
    assert!(page.captures().is_empty(), "captured {:?}", page.captures());
    assert!(page
        .position(&format!("click {}", selector_for(CONTRACTOR_DISMISS)))
        .is_none());
    assert!(page.position("arm_download").is_some());
}
