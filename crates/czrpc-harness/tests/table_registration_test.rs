//! Procedure table construction.

use czrpc_core::{
    CallError, ControlHandler, Handler, ProcedureTable, RegistrationError,
    table::{AUTH, GET_PROPERTY, Resolved, SET_PROPERTY},
};
use czrpc_harness::{Calculator, CalculatorRpc, calculator_table};
use czrpc_proto::Any;

fn noop() -> Handler<Calculator> {
    Handler::sync(|_: &Calculator, (): ()| Ok::<_, CallError>(()))
}

#[test]
fn ids_follow_registration_order() {
    let table = calculator_table().unwrap();

    assert!(table.lookup_by_id(0).unwrap().is_generic());
    for id in 1..table.len() as u8 {
        let entry = table.lookup_by_id(id).unwrap();
        assert_eq!(entry.id(), id);
        assert!(!entry.is_generic());
    }
    assert!(table.lookup_by_id(table.len() as u8).is_none());
}

#[test]
fn lookup_by_id_and_name_agree() {
    let table = calculator_table().unwrap();
    let by_id = table.lookup_by_id(CalculatorRpc::Echo.id()).unwrap();
    let Some(Resolved::Procedure(by_name)) = table.lookup_by_name("echo") else {
        panic!("echo should resolve to an ordinary procedure");
    };
    assert!(std::ptr::eq(by_id, by_name));
}

#[test]
fn control_procedures_are_installed_with_generic_entry() {
    let mut table = ProcedureTable::<Calculator>::new("Calculator");
    table.register_generic_entry().unwrap();

    for name in [AUTH, GET_PROPERTY, SET_PROPERTY] {
        assert!(matches!(table.lookup_by_name(name), Some(Resolved::Control(_))), "{name}");
        assert!(table.lookup_by_id(1).is_none());
    }
}

#[test]
fn duplicate_name_fails_before_serving() {
    let mut table = ProcedureTable::<Calculator>::new("Calculator");
    table.register_generic_entry().unwrap();
    table.register_procedure(1, "status", noop()).unwrap();

    assert_eq!(
        table.register_procedure(2, "status", noop()),
        Err(RegistrationError::DuplicateName("status".into()))
    );
    assert_eq!(
        table.register_control_procedure(
            "status",
            ControlHandler::new(|_, (): ()| Any::None)
        ),
        Err(RegistrationError::DuplicateName("status".into()))
    );
    assert_eq!(
        table.register_control_procedure(
            GET_PROPERTY,
            ControlHandler::new(|_, (): ()| Any::None)
        ),
        Err(RegistrationError::DuplicateName(GET_PROPERTY.into()))
    );

    // The failed registrations left the table untouched.
    assert_eq!(table.len(), 2);
    assert_eq!(table.register_procedure(2, "next", noop()), Ok(()));
}

#[test]
fn out_of_order_id_is_rejected() {
    let mut table = ProcedureTable::<Calculator>::new("Calculator");
    table.register_generic_entry().unwrap();

    assert_eq!(
        table.register_procedure(0, "zero", noop()),
        Err(RegistrationError::OutOfOrderId { name: "zero".into(), id: 0, expected: 1 })
    );
}

#[test]
fn extra_control_procedure_resolves_after_ordinary_ones() {
    let mut table = calculator_table().unwrap();
    table
        .register_control_procedure(
            "__version",
            ControlHandler::new(|_, (): ()| Any::UnsignedInteger(1)),
        )
        .unwrap();

    assert!(matches!(table.lookup_by_name("__version"), Some(Resolved::Control(_))));
    assert!(table.lookup_procedure("__version").is_none());
    assert!(table.lookup_control("add").is_none());
}
