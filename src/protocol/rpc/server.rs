//! Dispatch engine: turns one received record into one reply record.
//!
//! An [`RpcServer`] serves exactly one `(program, version)` pair. It owns
//! the procedure table, the optional authentication hook and the registry
//! it advertises itself through. Transport front-ends (see [`crate::tcp`]
//! and [`crate::udp`]) feed it records and ship the replies back.
//!
//! Processing of a record follows RFC 5531:
//! 1. decode the header and call body; anything that is not a version 2
//!    CALL is a framing error and gets no reply at all
//! 2. program mismatch -> `PROG_UNAVAIL`
//! 3. version mismatch -> `PROG_MISMATCH` advertising the single version
//! 4. credentials rejected by the hook -> `AUTH_ERROR(AUTH_BADCRED)`
//! 5. unknown procedure -> `PROC_UNAVAIL`
//! 6. undecodable arguments -> `GARBAGE_ARGS`, handler failure ->
//!    `SYSTEM_ERR`, otherwise `SUCCESS` followed by the encoded results

use std::collections::HashMap;
use std::future::Future;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::protocol::portmap::{self, Registry};
use crate::protocol::rpc::procedure::{FnProcedure, Procedure, ProcedureError};
use crate::protocol::rpc::{RpcError, MAX_RPC_RECORD_LENGTH};
use crate::protocol::xdr::rpc::{
    auth_error_reply_message, auth_stat, garbage_args_reply_message, make_success_reply,
    proc_unavail_reply_message, prog_mismatch_reply_message, prog_unavail_reply_message, rpc_body,
    rpc_msg, system_err_reply_message, Credential, RPC_VERSION,
};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};

/// Procedure number every RPC program answers with an empty reply.
pub const NULL_PROCEDURE: u32 = 0;

/// Predicate deciding whether a caller may run a procedure.
///
/// Receives the procedure number and the decoded credential.
pub type AuthHook = Arc<dyn Fn(u32, &Credential) -> bool + Send + Sync>;

struct ProcedureEntry {
    handler: Arc<dyn Procedure>,
    name: Option<String>,
}

/// What the dispatch engine decided for one call.
#[derive(Debug)]
pub enum Outcome {
    Success,
    ProgUnavail,
    ProgMismatch,
    AuthRejected,
    ProcUnavail,
    GarbageArgs(std::io::Error),
    SystemErr(anyhow::Error),
}

/// An encoded reply together with the decision that produced it.
#[derive(Debug)]
pub struct Reply {
    pub xid: u32,
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
}

impl Reply {
    /// After a `SYSTEM_ERR` the stream front-end hangs up; the caller is
    /// expected to reconnect as well.
    pub fn closes_connection(&self) -> bool {
        matches!(self.outcome, Outcome::SystemErr(_))
    }
}

/// Procedure table and call validation for one RPC program version.
pub struct RpcServer {
    program: u32,
    version: u32,
    procedures: RwLock<HashMap<u32, ProcedureEntry>>,
    auth: RwLock<Option<AuthHook>>,
    registry: RwLock<Option<Arc<dyn Registry>>>,
    max_record_len: AtomicUsize,
    shutdown: watch::Sender<bool>,
}

impl RpcServer {
    /// Creates a server for `program`/`version` whose procedure table only
    /// holds the null procedure 0. It advertises itself through
    /// [`portmap::system_registry`] unless told otherwise with
    /// [`RpcServer::set_registry`].
    pub fn new(program: u32, version: u32) -> Self {
        let (shutdown, _) = watch::channel(false);
        let server = Self {
            program,
            version,
            procedures: RwLock::new(HashMap::new()),
            auth: RwLock::new(None),
            registry: RwLock::new(Some(portmap::system_registry())),
            max_record_len: AtomicUsize::new(MAX_RPC_RECORD_LENGTH),
            shutdown,
        };
        server.register_with_name(NULL_PROCEDURE, |_: ()| future::ready(anyhow::Ok(())), "NULL");
        server
    }

    pub fn program(&self) -> u32 {
        self.program
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Binds `handler` to procedure number `proc`.
    ///
    /// The handler receives the decoded argument of type `A` and returns the
    /// result of type `R`; use `()` for procedures without arguments or
    /// results.
    pub fn register<A, R, F, Fut>(&self, proc: u32, handler: F)
    where
        A: Deserialize + Default + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_procedure(proc, Arc::new(FnProcedure::new(handler)), None);
    }

    /// Same as [`RpcServer::register`], with a display name used in logs.
    pub fn register_with_name<A, R, F, Fut>(&self, proc: u32, handler: F, name: &str)
    where
        A: Deserialize + Default + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        self.register_procedure(proc, Arc::new(FnProcedure::new(handler)), Some(name.to_string()));
    }

    /// Binds an already built [`Procedure`]. A previous binding for the same
    /// number, including the built-in null procedure, is replaced.
    pub fn register_procedure(&self, proc: u32, handler: Arc<dyn Procedure>, name: Option<String>) {
        let mut procedures = self.procedures.write().unwrap_or_else(PoisonError::into_inner);
        let replaced = procedures.insert(proc, ProcedureEntry { handler, name }).is_some();
        if replaced && proc != NULL_PROCEDURE {
            warn!("Procedure {} of program {} registered twice, replacing", proc, self.program);
        }
    }

    /// Installs a predicate every call must pass before its procedure runs.
    pub fn set_authentication_hook<F>(&self, hook: F)
    where
        F: Fn(u32, &Credential) -> bool + Send + Sync + 'static,
    {
        *self.auth.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(hook));
    }

    /// Replaces the registry used when serving starts. `None` disables
    /// portmapper registration.
    pub fn set_registry(&self, registry: Option<Arc<dyn Registry>>) {
        *self.registry.write().unwrap_or_else(PoisonError::into_inner) = registry;
    }

    /// Largest record accepted on stream transports.
    pub fn max_record_len(&self) -> usize {
        self.max_record_len.load(Ordering::Relaxed)
    }

    pub fn set_max_record_len(&self, max_len: usize) {
        self.max_record_len.store(max_len, Ordering::Relaxed);
    }

    /// Stops every listener serving this program. Idempotent.
    pub fn close(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`RpcServer::close`] has been called.
    pub(crate) async fn closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let closed = *shutdown.borrow_and_update();
            if closed || shutdown.changed().await.is_err() {
                return;
            }
        }
    }

    /// Advertises `port` for `protocol` through the configured registry.
    pub(crate) async fn register_with_portmapper(
        &self,
        protocol: u32,
        port: u16,
    ) -> Result<(), RpcError> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(registry) = registry else {
            debug!("Portmapper registration disabled for program {}", self.program);
            return Ok(());
        };
        portmap::register_service(
            registry.as_ref(),
            self.program,
            self.version,
            protocol,
            u32::from(port),
        )
        .await?;
        info!(
            "Registered program {} version {} protocol {} on port {}",
            self.program, self.version, protocol, port
        );
        Ok(())
    }

    /// Processes one record and builds the reply.
    ///
    /// An `Err` means the record could not be understood as an RPC call; no
    /// reply exists for it and the front-end decides the fate of the
    /// connection.
    pub async fn handle_record(&self, record: &[u8]) -> Result<Reply, RpcError> {
        let mut input = Cursor::new(record);
        let msg = deserialize::<rpc_msg>(&mut input).map_err(|e| {
            error!("Cannot read RPC Call message: {}", e);
            RpcError::MalformedHeader(e)
        })?;
        let xid = msg.xid;
        let call = match msg.body {
            rpc_body::CALL(call) => call,
            rpc_body::REPLY(_) => {
                error!("Unexpectedly received a Reply instead of a Call, xid {}", xid);
                return Err(RpcError::CallExpected);
            }
        };
        if call.rpcvers != RPC_VERSION {
            warn!("Invalid RPC version {} != {}", call.rpcvers, RPC_VERSION);
            return Err(RpcError::UnsupportedRpcVersion(call.rpcvers));
        }

        if call.prog != self.program {
            warn!(expected = self.program, was = call.prog, "Mismatched program number");
            return reply(prog_unavail_reply_message(xid), &[], Outcome::ProgUnavail);
        }

        if call.vers != self.version {
            warn!(expected = self.version, was = call.vers, "Mismatched program version");
            return reply(
                prog_mismatch_reply_message(xid, self.version),
                &[],
                Outcome::ProgMismatch,
            );
        }

        let auth = self.auth.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(auth) = auth {
            let accepted = match call.cred.decode() {
                Ok(cred) => {
                    let accepted = auth(call.proc, &cred);
                    if !accepted {
                        info!(proc = call.proc, prog = call.prog, "Authentication rejected");
                    }
                    accepted
                }
                Err(e) => {
                    error!("Cannot decode credential: {}", e);
                    false
                }
            };
            if !accepted {
                return reply(
                    auth_error_reply_message(xid, auth_stat::AUTH_BADCRED),
                    &[],
                    Outcome::AuthRejected,
                );
            }
        }

        let entry = {
            let procedures = self.procedures.read().unwrap_or_else(PoisonError::into_inner);
            procedures.get(&call.proc).map(|entry| (entry.handler.clone(), entry.name.clone()))
        };
        let Some((handler, name)) = entry else {
            warn!(proc = call.proc, prog = call.prog, "Unsupported procedure call");
            return reply(proc_unavail_reply_message(xid), &[], Outcome::ProcUnavail);
        };

        debug!(
            "RPC {} xid {} proc {}",
            name.as_deref().unwrap_or("<unnamed>"),
            xid,
            call.proc
        );
        let args = &record[input.position() as usize..];
        match handler.invoke(args).await {
            Ok(results) => reply(make_success_reply(xid), &results, Outcome::Success),
            Err(ProcedureError::GarbageArgs(e)) => {
                warn!("Cannot decode arguments of procedure {}: {}", call.proc, e);
                reply(garbage_args_reply_message(xid), &[], Outcome::GarbageArgs(e))
            }
            Err(ProcedureError::Failed(e)) => {
                error!("Unable to perform procedure call {}: {:?}", call.proc, e);
                reply(system_err_reply_message(xid), &[], Outcome::SystemErr(e))
            }
        }
    }
}

fn reply(header: rpc_msg, results: &[u8], outcome: Outcome) -> Result<Reply, RpcError> {
    let mut bytes = Vec::with_capacity(DEFAULT_REPLY_CAPACITY + results.len());
    header.serialize(&mut bytes)?;
    bytes.extend_from_slice(results);
    Ok(Reply { xid: header.xid, bytes, outcome })
}

/// Room for a reply header with a null verifier.
const DEFAULT_REPLY_CAPACITY: usize = 32;
