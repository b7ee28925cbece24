#![no_main]

use std::{io, sync::Arc};

use bytes::Bytes;
use czrpc_core::{CallError, Connection, Handler, ObjectData, ProcedureTable, Transport};
use czrpc_proto::Any;
use libfuzzer_sys::fuzz_target;

struct Discard;

impl Transport for Discard {
    fn send(&self, _frame: Bytes) -> io::Result<()> {
        Ok(())
    }

    fn close(&self) {}
}

struct Target;

fn table() -> ProcedureTable<Target> {
    let mut table = ProcedureTable::new("Target");
    table.register_generic_entry().unwrap();
    table
        .register_procedure(1, "sum", Handler::sync(|_: &Target, (a, b): (i32, i32)| {
            a.checked_add(b).ok_or_else(|| CallError::new("Overflow"))
        }))
        .unwrap();
    table
        .register_procedure(2, "echo", Handler::sync(|_: &Target, (v,): (Any,)| Ok(v)))
        .unwrap();
    table
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary input either dispatches or closes the connection; it never
    // panics the engine.
    let conn = Connection::new(Arc::new(table()), Arc::new(Target), Arc::new(Discard))
        .with_object_data(Arc::new(ObjectData::new()));
    let _ = conn.receive(data);
});
