//! This module provides data structures for the Remote Procedure Call (RPC)
//! protocol as defined in RFC 5531 (previously RFC 1057). These structures
//! handle serialization and deserialization of RPC messages between client
//! and server.

// Keep RFC naming conventions
#![allow(non_camel_case_types)]

use std::io::{Cursor, Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::*;

/// The only RPC protocol version this crate speaks.
pub const RPC_VERSION: u32 = 2;

/// Maximum size of the body of an `opaque_auth`.
pub const MAX_AUTH_BYTES: usize = 400;

/// Authentication status codes indicating why authentication failed
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Invalid credentials provided by client (checksum/signature verification failed)
    #[default]
    AUTH_BADCRED = 1,
    /// Credentials rejected - client needs to establish a new session
    AUTH_REJECTEDCRED = 2,
    /// Invalid verifier provided by client (checksum/signature verification failed)
    AUTH_BADVERF = 3,
    /// Verifier rejected due to expiration or replay attempt
    AUTH_REJECTEDVERF = 4,
    /// Authentication mechanism too weak for requested operation
    AUTH_TOOWEAK = 5,
}
impl SerializeEnum for auth_stat {}
impl DeserializeEnum for auth_stat {}

/// Authentication flavor (mechanism) identifiers for RPC.
///
/// On the wire the flavor is a plain `u32` (see [`opaque_auth::flavor`]) so
/// that calls carrying flavors outside this list, e.g. `RPCSEC_GSS`, still
/// decode.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum auth_flavor {
    /// No authentication
    #[default]
    AUTH_NULL = 0,
    /// UNIX-style authentication (uid/gid)
    AUTH_UNIX = 1,
    /// Short-form authentication
    AUTH_SHORT = 2,
    /// DES authentication
    AUTH_DES = 3,
}

impl From<auth_flavor> for u32 {
    fn from(flavor: auth_flavor) -> u32 {
        flavor as u32
    }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
/// UNIX-style credentials used for authentication
pub struct auth_unix {
    /// Timestamp to prevent replay attacks
    pub stamp: u32,
    /// The name of the client machine
    pub machinename: String,
    /// The effective user ID of the caller
    pub uid: u32,
    /// The effective group ID of the caller
    pub gid: u32,
    /// A list of additional group IDs for the caller
    pub gids: Vec<u32>,
}
DeserializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);
SerializeStruct!(auth_unix, stamp, machinename, uid, gid, gids);

/// Authentication data structure used in RPC protocol for both client and server authentication.
///
/// Call messages carry two of these (credential and verifier), replies carry
/// one (the response verifier). The body is interpreted according to the
/// flavor and never exceeds [`MAX_AUTH_BYTES`].
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    /// The authentication mechanism being used, an [`auth_flavor`] value
    pub flavor: u32,
    /// The opaque authentication data associated with that mechanism
    pub body: Vec<u8>,
}

impl Serialize for opaque_auth {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        if self.body.len() > MAX_AUTH_BYTES {
            return Err(invalid_data("opaque_auth body exceeds 400 bytes"));
        }
        self.flavor.serialize(dest)?;
        self.body.serialize(dest)
    }
}

impl Deserialize for opaque_auth {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        self.flavor.deserialize(src)?;
        read_opaque(src, &mut self.body, MAX_AUTH_BYTES)
    }
}

/// A decoded credential, as handed to a server's authentication hook.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Credential {
    /// `AUTH_NULL`, no identity at all.
    None,
    /// `AUTH_UNIX` with its decoded body.
    Unix(auth_unix),
}

impl opaque_auth {
    /// Builds an `AUTH_UNIX` credential.
    pub fn unix(cred: &auth_unix) -> std::io::Result<opaque_auth> {
        Ok(opaque_auth { flavor: auth_flavor::AUTH_UNIX.into(), body: to_bytes(cred)? })
    }

    /// The flavor, if it is one this crate knows about.
    pub fn known_flavor(&self) -> Option<auth_flavor> {
        <auth_flavor as num_traits::FromPrimitive>::from_u32(self.flavor)
    }

    /// Decodes the body according to the flavor.
    ///
    /// Unsupported flavors (`AUTH_SHORT`, `AUTH_DES` and anything unknown)
    /// always fail, so a server never proceeds with a credential it could
    /// not interpret.
    pub fn decode(&self) -> std::io::Result<Credential> {
        match self.known_flavor() {
            Some(auth_flavor::AUTH_NULL) => Ok(Credential::None),
            Some(auth_flavor::AUTH_UNIX) => {
                Ok(Credential::Unix(deserialize(&mut Cursor::new(&self.body))?))
            }
            _ => Err(invalid_data(&format!("unsupported auth flavor {}", self.flavor))),
        }
    }
}

/// RPC message structure as defined in RFC 5531 (previously RFC 1057).
///
/// Each RPC message begins with a transaction identifier (xid) followed by a
/// discriminated union containing either a CALL or REPLY message body.
/// The xid in a REPLY always matches the xid from the initiating CALL.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_msg {
    /// Transaction identifier used to match calls and replies
    pub xid: u32,
    /// The body of the RPC message (call or reply)
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

/// The body of an RPC message, which can be either a call or a reply
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum rpc_body {
    /// A call to a remote procedure
    CALL(call_body),
    /// A reply from a remote procedure
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rpc_body::CALL(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
            rpc_body::REPLY(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
        }
        Ok(())
    }
}
impl Deserialize for rpc_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rpc_body::CALL(deserialize(src)?),
            1 => *self = rpc_body::REPLY(deserialize(src)?),
            msg_type => {
                return Err(invalid_data(&format!("Invalid message type in rpc_body: {msg_type}")))
            }
        }

        Ok(())
    }
}

/// The body of an RPC call, containing all information needed for a remote procedure call
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct call_body {
    /// RPC version, must be 2
    pub rpcvers: u32,
    /// The program to call
    pub prog: u32,
    /// The version of the program
    pub vers: u32,
    /// The procedure within the program to call
    pub proc: u32,
    /// Authentication credentials for the caller
    pub cred: opaque_auth,
    /// Authentication verifier for the caller
    pub verf: opaque_auth,
    /* procedure specific parameters start here */
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

/// The body of an RPC reply, indicating whether the call was accepted or denied
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum reply_body {
    /// The call was accepted
    MSG_ACCEPTED(accepted_reply),
    /// The call was denied
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
            reply_body::MSG_DENIED(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
        }
        Ok(())
    }
}
impl Deserialize for reply_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => *self = reply_body::MSG_DENIED(deserialize(src)?),
            reply_status => {
                return Err(invalid_data(&format!(
                    "Invalid reply status in reply_body: {reply_status}"
                )))
            }
        }

        Ok(())
    }
}

/// Information about program version mismatch
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    /// Lowest version supported
    pub low: u32,
    /// Highest version supported
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to an RPC call that was accepted by the server.
///
/// Even though the call was accepted, there could still be an error in processing it.
/// The procedure's results follow this structure on the wire only when
/// `reply_data` is `SUCCESS`.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct accepted_reply {
    /// Authentication verifier from server
    pub verf: opaque_auth,
    /// Reply data union discriminated by accept_stat
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

/// Response data for an accepted RPC call, discriminated by accept_stat.
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum accept_body {
    /// Call completed successfully
    #[default]
    SUCCESS,
    /// Program is not available on this server
    PROG_UNAVAIL,
    /// Program version mismatch, includes supported version range
    PROG_MISMATCH(mismatch_info),
    /// Requested procedure is not available
    PROC_UNAVAIL,
    /// Server could not decode the call arguments
    GARBAGE_ARGS,
    /// Server failed while executing the procedure
    SYSTEM_ERR,
}

impl Serialize for accept_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            accept_body::SUCCESS => 0_u32.serialize(dest),
            accept_body::PROG_UNAVAIL => 1_u32.serialize(dest),
            accept_body::PROG_MISMATCH(v) => {
                2_u32.serialize(dest)?;
                v.serialize(dest)
            }
            accept_body::PROC_UNAVAIL => 3_u32.serialize(dest),
            accept_body::GARBAGE_ARGS => 4_u32.serialize(dest),
            accept_body::SYSTEM_ERR => 5_u32.serialize(dest),
        }
    }
}
impl Deserialize for accept_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = accept_body::SUCCESS,
            1 => *self = accept_body::PROG_UNAVAIL,
            2 => *self = accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => *self = accept_body::PROC_UNAVAIL,
            4 => *self = accept_body::GARBAGE_ARGS,
            5 => *self = accept_body::SYSTEM_ERR,
            accept_stat => {
                return Err(invalid_data(&format!(
                    "Invalid accept stat in accept_body: {accept_stat}"
                )));
            }
        }

        Ok(())
    }
}

/// Reply sent when an RPC call is rejected by the server, either because
/// the RPC protocol version is unsupported or because authentication failed.
#[allow(non_camel_case_types)]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rejected_reply {
    /// RPC version mismatch - includes supported version range
    RPC_MISMATCH(mismatch_info),
    /// Authentication failed - includes specific error code
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

impl Serialize for rejected_reply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
            rejected_reply::AUTH_ERROR(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)?;
            }
        }

        Ok(())
    }
}
impl Deserialize for rejected_reply {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        match deserialize::<u32>(src)? {
            0 => *self = rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => *self = rejected_reply::AUTH_ERROR(deserialize(src)?),
            stat => {
                return Err(invalid_data(&format!("Invalid reject stat in rejected_reply: {stat}")))
            }
        }

        Ok(())
    }
}

/// Creates a call message with a null verifier.
pub fn call_message(xid: u32, prog: u32, vers: u32, proc: u32, cred: opaque_auth) -> rpc_msg {
    let call = call_body {
        rpcvers: RPC_VERSION,
        prog,
        vers,
        proc,
        cred,
        verf: opaque_auth::default(),
    };
    rpc_msg { xid, body: rpc_body::CALL(call) }
}

fn accepted_reply_message(xid: u32, reply_data: accept_body) -> rpc_msg {
    let verf = opaque_auth::default();
    let reply = reply_body::MSG_ACCEPTED(accepted_reply { verf, reply_data });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message indicating that the requested procedure is not available
pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROC_UNAVAIL)
}

/// Creates a reply message indicating that the requested program is not available
pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROG_UNAVAIL)
}

/// Creates a reply message indicating a program version mismatch
pub fn prog_mismatch_reply_message(xid: u32, accepted_ver: u32) -> rpc_msg {
    accepted_reply_message(
        xid,
        accept_body::PROG_MISMATCH(mismatch_info { low: accepted_ver, high: accepted_ver }),
    )
}

/// Creates a reply message indicating that the arguments could not be decoded
pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::GARBAGE_ARGS)
}

/// Creates a reply message indicating that the procedure itself failed
pub fn system_err_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::SYSTEM_ERR)
}

/// Creates a reply message rejecting the caller's credentials
pub fn auth_error_reply_message(xid: u32, stat: auth_stat) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a reply message indicating an RPC version mismatch
pub fn rpc_vers_mismatch(xid: u32) -> rpc_msg {
    let reply = reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(mismatch_info {
        low: RPC_VERSION,
        high: RPC_VERSION,
    }));
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Creates a successful reply message; the procedure's results follow it
pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::SUCCESS)
}
