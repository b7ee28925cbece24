//! Procedure registration and lookup.
//!
//! A [`ProcedureTable`] is built once per served object type, before any
//! connection exists, and shared read-only afterwards. It holds two disjoint
//! collections:
//!
//! - ordinary procedures, addressed by a dense id (0 is the generic entry)
//!   or by name through a generic call
//! - control procedures (`__auth`, `__getProperty`, `__setProperty` and any
//!   extra ones), addressed by name only, always generic
//!
//! Each registered [`Handler`] is a type-erased closure generated at
//! registration time. It owns the parameter decoding for both call paths,
//! runs the procedure, and catches panics so that a failing procedure body
//! becomes an error reply instead of unwinding into the dispatch engine.
//!
//! # Invariants
//!
//! - ids are exactly `0..len` in registration order, 0 being the generic entry
//! - no name appears twice across both collections
//! - ids fit the 7-bit header field

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use czrpc_proto::{Any, FrameBuilder, FromAnyParams, Header, IntoAny, payload};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{
    deferred::Deferred,
    error::{CallError, RegistrationError},
    object::ObjectData,
};

/// Name of the control procedure that authenticates a connection.
pub const AUTH: &str = "__auth";
/// Name of the control procedure that reads an object property.
pub const GET_PROPERTY: &str = "__getProperty";
/// Name of the control procedure that writes an object property.
pub const SET_PROPERTY: &str = "__setProperty";

/// Name of the id-0 entry. Not reachable through a generic call.
pub const GENERIC_ENTRY: &str = "__generic";

/// How the parameters of a call were encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    /// Name lookup, parameters as a list of [`Any`], result as [`Any`].
    Generic,
    /// Id lookup, parameters and result in their typed encoding.
    Direct,
}

/// A procedure's return value with its encoding deferred until the reply is
/// built.
pub(crate) trait ReplyValue: Send {
    fn encode(self: Box<Self>, kind: CallKind, out: &mut FrameBuilder) -> czrpc_proto::Result<()>;
}

impl<R> ReplyValue for R
where
    R: Serialize + IntoAny + Send,
{
    fn encode(self: Box<Self>, kind: CallKind, out: &mut FrameBuilder) -> czrpc_proto::Result<()> {
        match kind {
            CallKind::Generic => out.write(&(*self).into_any()),
            CallKind::Direct => out.write(&*self),
        }
    }
}

pub(crate) type CallResult = Result<Box<dyn ReplyValue>, CallError>;

/// Outcome of running a handler.
pub(crate) enum Invocation {
    /// Parameters did not decode into the procedure's signature.
    InvalidParameters,
    /// Synchronous result.
    Ready(CallResult),
    /// Result arrives later.
    Deferred(Deferred<CallResult>),
}

type InvokeFn<T> = dyn Fn(&T, &mut &[u8], CallKind) -> Invocation + Send + Sync;

/// Type-erased dispatcher bound to one procedure.
pub struct Handler<T> {
    invoke: Box<InvokeFn<T>>,
    deferred: bool,
}

impl<T: 'static> Handler<T> {
    /// Bind a procedure that produces its result before returning.
    ///
    /// `P` is the parameter tuple, `R` the return value. Both paths are
    /// supported: `P` decodes from the typed encoding for direct calls and
    /// converts from a list of [`Any`] for generic calls.
    pub fn sync<P, R, F>(procedure: F) -> Self
    where
        P: DeserializeOwned + FromAnyParams + 'static,
        R: Serialize + IntoAny + Send + 'static,
        F: Fn(&T, P) -> Result<R, CallError> + Send + Sync + 'static,
    {
        let invoke = move |object: &T, input: &mut &[u8], kind: CallKind| {
            let Some(params) = decode_params::<P>(input, kind) else {
                return Invocation::InvalidParameters;
            };
            let result = guarded(|| procedure(object, params))
                .and_then(|r| r.map(|value| Box::new(value) as Box<dyn ReplyValue>));
            Invocation::Ready(result)
        };
        Self { invoke: Box::new(invoke), deferred: false }
    }

    /// Bind a procedure that returns a handle to a result produced later.
    pub fn deferred<P, R, F>(procedure: F) -> Self
    where
        P: DeserializeOwned + FromAnyParams + 'static,
        R: Serialize + IntoAny + Send + 'static,
        F: Fn(&T, P) -> Deferred<Result<R, CallError>> + Send + Sync + 'static,
    {
        let invoke = move |object: &T, input: &mut &[u8], kind: CallKind| {
            let Some(params) = decode_params::<P>(input, kind) else {
                return Invocation::InvalidParameters;
            };
            match guarded(|| procedure(object, params)) {
                Ok(pending) => Invocation::Deferred(
                    pending.map(|r| r.map(|value| Box::new(value) as Box<dyn ReplyValue>)),
                ),
                Err(err) => Invocation::Ready(Err(err)),
            }
        };
        Self { invoke: Box::new(invoke), deferred: true }
    }

    /// Check if the procedure returns a deferred result.
    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub(crate) fn invoke(&self, object: &T, input: &mut &[u8], kind: CallKind) -> Invocation {
        (self.invoke)(object, input, kind)
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler").field("deferred", &self.deferred).finish_non_exhaustive()
    }
}

fn decode_params<P>(input: &mut &[u8], kind: CallKind) -> Option<P>
where
    P: DeserializeOwned + FromAnyParams,
{
    match kind {
        CallKind::Generic => {
            payload::read::<Vec<Any>>(input).ok().and_then(P::from_any_params)
        },
        CallKind::Direct => payload::read::<P>(input).ok(),
    }
}

/// Run a procedure body, turning a panic into a [`CallError`].
fn guarded<R>(body: impl FnOnce() -> R) -> Result<R, CallError> {
    catch_unwind(AssertUnwindSafe(body)).map_err(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "procedure panicked".to_owned());
        CallError::new(message)
    })
}

/// Per-connection state visible to control procedures.
#[derive(Debug)]
pub struct Session {
    authenticated: AtomicBool,
    object: Arc<ObjectData>,
}

impl Session {
    /// Fresh, unauthenticated session over `object`.
    pub fn new(object: Arc<ObjectData>) -> Self {
        Self { authenticated: AtomicBool::new(false), object }
    }

    /// Check if `__auth` last succeeded on this connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Record the outcome of an authentication attempt.
    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    /// Properties and auth token of the served object.
    pub fn object(&self) -> &ObjectData {
        &self.object
    }
}

type ControlFn = dyn Fn(&Session, &mut &[u8]) -> Invocation + Send + Sync;

/// Type-erased dispatcher for a control procedure.
///
/// Control procedures are always called generically and always return a
/// single [`Any`] synchronously.
pub struct ControlHandler {
    invoke: Box<ControlFn>,
}

impl ControlHandler {
    /// Bind a control procedure taking the parameter tuple `P`.
    pub fn new<P, F>(procedure: F) -> Self
    where
        P: FromAnyParams + 'static,
        F: Fn(&Session, P) -> Any + Send + Sync + 'static,
    {
        let invoke = move |session: &Session, input: &mut &[u8]| {
            let Some(params) =
                payload::read::<Vec<Any>>(input).ok().and_then(P::from_any_params)
            else {
                return Invocation::InvalidParameters;
            };
            let result = guarded(|| procedure(session, params))
                .map(|value| Box::new(value) as Box<dyn ReplyValue>);
            Invocation::Ready(result)
        };
        Self { invoke: Box::new(invoke) }
    }

    pub(crate) fn invoke(&self, session: &Session, input: &mut &[u8]) -> Invocation {
        (self.invoke)(session, input)
    }
}

impl fmt::Debug for ControlHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandler").finish_non_exhaustive()
    }
}

/// An ordinary table slot.
#[derive(Debug)]
pub struct ProcedureEntry<T> {
    name: String,
    id: u8,
    handler: Option<Handler<T>>,
}

impl<T> ProcedureEntry<T> {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Id used by direct calls.
    pub fn id(&self) -> u8 {
        self.id
    }

    /// Check if this is the reserved id-0 entry.
    pub fn is_generic(&self) -> bool {
        self.handler.is_none()
    }

    /// Bound dispatcher, absent for the generic entry.
    pub fn handler(&self) -> Option<&Handler<T>> {
        self.handler.as_ref()
    }
}

/// A control procedure slot.
#[derive(Debug)]
pub struct ControlEntry {
    name: String,
    handler: ControlHandler,
}

impl ControlEntry {
    /// Registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn handler(&self) -> &ControlHandler {
        &self.handler
    }
}

/// Result of a name lookup.
#[derive(Debug)]
pub enum Resolved<'a, T> {
    /// Ordinary procedure.
    Procedure(&'a ProcedureEntry<T>),
    /// Control procedure.
    Control(&'a ControlEntry),
}

impl<T> Resolved<'_, T> {
    /// Name of the resolved entry.
    pub fn name(&self) -> &str {
        match self {
            Self::Procedure(entry) => entry.name(),
            Self::Control(entry) => entry.name(),
        }
    }
}

/// Procedures callable on objects of type `T`.
#[derive(Debug)]
pub struct ProcedureTable<T> {
    name: String,
    procedures: Vec<ProcedureEntry<T>>,
    controls: Vec<ControlEntry>,
}

impl<T: 'static> ProcedureTable<T> {
    /// Empty table. `name` identifies the served type in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), procedures: Vec::new(), controls: Vec::new() }
    }

    /// Install the id-0 generic entry and the built-in control procedures.
    ///
    /// # Errors
    ///
    /// `GenericEntryNotFirst` if anything was registered before.
    pub fn register_generic_entry(&mut self) -> Result<(), RegistrationError> {
        if !self.procedures.is_empty() || !self.controls.is_empty() {
            return Err(RegistrationError::GenericEntryNotFirst);
        }

        self.procedures.push(ProcedureEntry {
            name: GENERIC_ENTRY.to_owned(),
            id: Header::GENERIC_RPC_ID,
            handler: None,
        });

        self.register_control_procedure(
            AUTH,
            ControlHandler::new(|session, (token,): (String,)| {
                let passed = session.object().check_auth_token(&token);
                session.set_authenticated(passed);
                Any::Bool(passed)
            }),
        )?;
        self.register_control_procedure(
            GET_PROPERTY,
            ControlHandler::new(|session, (name,): (String,)| session.object().get_property(&name)),
        )?;
        self.register_control_procedure(
            SET_PROPERTY,
            ControlHandler::new(|session, (name, value): (String, Any)| {
                Any::Bool(session.object().set_property(&name, value))
            }),
        )?;

        debug!(table = %self.name, "registered generic entry");
        Ok(())
    }

    /// Register an ordinary procedure under the next free id.
    ///
    /// # Errors
    ///
    /// - `GenericEntryMissing` before [`Self::register_generic_entry`]
    /// - `IdOutOfRange` past the 7-bit id space
    /// - `OutOfOrderId` if `id` is not the next free id
    /// - `DuplicateName` if `name` is taken by any entry
    pub fn register_procedure(
        &mut self,
        id: u8,
        name: impl Into<String>,
        handler: Handler<T>,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        let expected = self.procedures.len();

        if expected == 0 {
            return Err(RegistrationError::GenericEntryMissing(name));
        }
        if expected > usize::from(Header::MAX_RPC_ID) {
            return Err(RegistrationError::IdOutOfRange(expected));
        }
        if usize::from(id) != expected {
            return Err(RegistrationError::OutOfOrderId { name, id, expected });
        }
        self.ensure_unique(&name)?;

        debug!(table = %self.name, procedure = %name, id, deferred = handler.is_deferred(), "registered procedure");
        self.procedures.push(ProcedureEntry { name, id, handler: Some(handler) });
        Ok(())
    }

    /// Register a name-only control procedure.
    ///
    /// # Errors
    ///
    /// `DuplicateName` if `name` is taken by any entry.
    pub fn register_control_procedure(
        &mut self,
        name: impl Into<String>,
        handler: ControlHandler,
    ) -> Result<(), RegistrationError> {
        let name = name.into();
        self.ensure_unique(&name)?;

        debug!(table = %self.name, procedure = %name, "registered control procedure");
        self.controls.push(ControlEntry { name, handler });
        Ok(())
    }

    fn ensure_unique(&self, name: &str) -> Result<(), RegistrationError> {
        let taken = self.procedures.iter().any(|e| e.name == name)
            || self.controls.iter().any(|e| e.name == name);
        if taken {
            return Err(RegistrationError::DuplicateName(name.to_owned()));
        }
        Ok(())
    }
}

impl<T> ProcedureTable<T> {
    /// Name of the served type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of ordinary ids, generic entry included.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Check if nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Ordinary entry with the given id.
    pub fn lookup_by_id(&self, id: u8) -> Option<&ProcedureEntry<T>> {
        self.procedures.get(usize::from(id))
    }

    /// Ordinary procedure with the given name. Never returns the generic entry.
    pub fn lookup_procedure(&self, name: &str) -> Option<&ProcedureEntry<T>> {
        self.procedures.iter().find(|e| !e.is_generic() && e.name == name)
    }

    /// Control procedure with the given name.
    pub fn lookup_control(&self, name: &str) -> Option<&ControlEntry> {
        self.controls.iter().find(|e| e.name == name)
    }

    /// Resolve a generic call: ordinary procedures first, then control.
    pub fn lookup_by_name(&self, name: &str) -> Option<Resolved<'_, T>> {
        self.lookup_procedure(name)
            .map(Resolved::Procedure)
            .or_else(|| self.lookup_control(name).map(Resolved::Control))
    }

    /// Names of the ordinary procedures in id order, generic entry excluded.
    pub fn procedure_names(&self) -> impl Iterator<Item = &str> {
        self.procedures.iter().filter(|e| !e.is_generic()).map(ProcedureEntry::name)
    }
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;

    struct Counter {
        base: i32,
    }

    fn table() -> ProcedureTable<Counter> {
        let mut table = ProcedureTable::new("Counter");
        table.register_generic_entry().unwrap();
        table
            .register_procedure(
                1,
                "offset",
                Handler::sync(|c: &Counter, (n,): (i32,)| Ok::<_, CallError>(c.base + n)),
            )
            .unwrap();
        table
    }

    fn encoded<V: Serialize>(value: &V) -> BytesMut {
        let mut out = BytesMut::new();
        payload::write(value, &mut out).unwrap();
        out
    }

    fn ready_value(invocation: Invocation, kind: CallKind) -> BytesMut {
        let Invocation::Ready(Ok(value)) = invocation else {
            panic!("expected a ready value");
        };
        let mut builder = FrameBuilder::new(Header::request(0, 0), None);
        value.encode(kind, &mut builder).unwrap();
        BytesMut::from(&builder.finish().unwrap()[Header::SIZE..])
    }

    #[test]
    fn generic_entry_must_come_first() {
        let mut table = ProcedureTable::<Counter>::new("Counter");
        let err = table
            .register_procedure(0, "early", Handler::sync(|_: &Counter, (): ()| Ok(())))
            .unwrap_err();
        assert_eq!(err, RegistrationError::GenericEntryMissing("early".into()));

        table.register_generic_entry().unwrap();
        assert_eq!(table.register_generic_entry(), Err(RegistrationError::GenericEntryNotFirst));
    }

    #[test]
    fn ids_are_dense_in_registration_order() {
        let mut table = table();
        let err = table
            .register_procedure(3, "skip", Handler::sync(|_: &Counter, (): ()| Ok(())))
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::OutOfOrderId { name: "skip".into(), id: 3, expected: 2 }
        );

        assert_eq!(table.lookup_by_id(0).map(ProcedureEntry::is_generic), Some(true));
        assert_eq!(table.lookup_by_id(1).map(ProcedureEntry::name), Some("offset"));
        assert!(table.lookup_by_id(2).is_none());
    }

    #[test]
    fn duplicate_names_fail_across_collections() {
        let mut table = table();
        let dup = table
            .register_procedure(2, "offset", Handler::sync(|_: &Counter, (): ()| Ok(())))
            .unwrap_err();
        assert_eq!(dup, RegistrationError::DuplicateName("offset".into()));

        let shadow = table
            .register_procedure(2, AUTH, Handler::sync(|_: &Counter, (): ()| Ok(())))
            .unwrap_err();
        assert_eq!(shadow, RegistrationError::DuplicateName(AUTH.into()));

        let control = table
            .register_control_procedure("offset", ControlHandler::new(|_, (): ()| Any::None))
            .unwrap_err();
        assert_eq!(control, RegistrationError::DuplicateName("offset".into()));
    }

    #[test]
    fn id_space_is_seven_bits() {
        let mut table = ProcedureTable::<Counter>::new("Counter");
        table.register_generic_entry().unwrap();
        for id in 1..=Header::MAX_RPC_ID {
            table
                .register_procedure(id, format!("p{id}"), Handler::sync(|_: &Counter, (): ()| Ok(())))
                .unwrap();
        }
        let err = table
            .register_procedure(0, "overflow", Handler::sync(|_: &Counter, (): ()| Ok(())))
            .unwrap_err();
        assert_eq!(err, RegistrationError::IdOutOfRange(128));
    }

    #[test]
    fn name_lookup_prefers_procedures_and_hides_generic_entry() {
        let table = table();
        assert!(matches!(table.lookup_by_name("offset"), Some(Resolved::Procedure(_))));
        assert!(matches!(table.lookup_by_name(SET_PROPERTY), Some(Resolved::Control(_))));
        assert!(table.lookup_by_name(GENERIC_ENTRY).is_none());
        assert!(table.lookup_by_name("missing").is_none());
        assert_eq!(table.procedure_names().collect::<Vec<_>>(), vec!["offset"]);
    }

    #[test]
    fn handler_decodes_both_call_paths() {
        let table = table();
        let handler = table.lookup_by_id(1).and_then(ProcedureEntry::handler).unwrap();
        let object = Counter { base: 10 };

        let typed = encoded(&(5i32,));
        let out = ready_value(handler.invoke(&object, &mut &typed[..], CallKind::Direct), CallKind::Direct);
        assert_eq!(payload::read::<i32>(&mut &out[..]).unwrap(), 15);

        let generic = encoded(&vec![Any::Integer(7)]);
        let out =
            ready_value(handler.invoke(&object, &mut &generic[..], CallKind::Generic), CallKind::Generic);
        assert_eq!(payload::read::<Any>(&mut &out[..]).unwrap(), Any::Integer(17));
    }

    #[test]
    fn mismatched_parameters_are_reported_not_invoked() {
        let table = table();
        let handler = table.lookup_by_id(1).and_then(ProcedureEntry::handler).unwrap();
        let object = Counter { base: 0 };

        let wrong = encoded(&vec![Any::String("seven".into())]);
        let invocation = handler.invoke(&object, &mut &wrong[..], CallKind::Generic);
        assert!(matches!(invocation, Invocation::InvalidParameters));
    }

    #[test]
    fn panicking_procedure_becomes_call_error() {
        #[allow(clippy::panic)]
        let handler = Handler::sync(|_: &Counter, (): ()| -> Result<(), CallError> {
            panic!("boom")
        });
        let input = encoded(&());
        let invocation = handler.invoke(&Counter { base: 0 }, &mut &input[..], CallKind::Direct);
        let Invocation::Ready(Err(err)) = invocation else {
            panic!("expected an error");
        };
        assert_eq!(err.message(), "boom");
    }

    #[test]
    fn auth_control_sets_session_flag() {
        let table = table();
        let session = Session::new(Arc::new(ObjectData::new().with_auth_token("pw")));
        let auth = table.lookup_control(AUTH).unwrap();

        let wrong = encoded(&vec![Any::String("nope".into())]);
        let out = ready_value(auth.handler().invoke(&session, &mut &wrong[..]), CallKind::Generic);
        assert_eq!(payload::read::<Any>(&mut &out[..]).unwrap(), Any::Bool(false));
        assert!(!session.is_authenticated());

        let right = encoded(&vec![Any::String("pw".into())]);
        let out = ready_value(auth.handler().invoke(&session, &mut &right[..]), CallKind::Generic);
        assert_eq!(payload::read::<Any>(&mut &out[..]).unwrap(), Any::Bool(true));
        assert!(session.is_authenticated());
    }
}
