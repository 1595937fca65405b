// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Host-facing toolbox for the Foundry agent.
//!
//! The agent runs inside a container but most of its work happens on the
//! host: probes, `podman` invocations, bootloader surgery. This crate carries
//! the pieces that cross that boundary -- an [`Executor`] abstraction over
//! external binaries (with a fake for tests), helpers for building
//! host-namespace and time-bounded command lines, shell quoting, and
//! enumeration of the interfaces usable as probe sources.

pub mod command;
pub mod executor;
pub mod interfaces;

pub use command::{
    host_command, join_quoted, quote, timed, Command, CommandOutput,
    INTERNAL_ERROR_EXIT_CODE, TIMEOUT_EXIT_CODE,
};
pub use executor::{
    BoxedExecutor, CommandSequence, ExecutionError, Executor, FakeExecutor,
    HostExecutor,
};
pub use interfaces::{
    apply_forced_mac, list_outgoing_nics, InterfaceError, OutgoingNic,
};
