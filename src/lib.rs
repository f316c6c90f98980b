//! Request dispatch layer for the repofs virtual filesystem.
//!
//! Translates filesystem protocol events into operations against the inode
//! tree, and tree results back into protocol-legal replies. Two dispatcher
//! flavors cover the two channel shapes a mount can be served through:
//!
//! - [`fuse_dispatch::FuseDispatcher`] handles identifier-addressed
//!   callbacks from a kernel filesystem channel.
//! - [`projection_dispatch::ProjectionDispatcher`] handles path-addressed
//!   callbacks and after-the-fact change notifications from an on-demand
//!   projection channel, including out-of-order delivery.
//!
//! The host environment picks exactly one of the two at mount construction
//! time. Both sit on top of the same [`tree::InodeTree`] collaborator,
//! which owns all storage; the dispatcher owns only the enumeration
//! session table and the virtual configuration file content.

pub mod attr;
pub mod config_file;
pub mod enumeration;
pub mod error;
pub mod fuse_dispatch;
pub mod path;
pub mod projection_dispatch;
pub mod reconcile;
pub mod stats;
pub mod tree;

#[cfg(test)]
mod test_utils;


pub use error::{FsError, FsResult};
pub use fuse_dispatch::{ChannelCapabilities, FuseDispatcher, FuseHandler};
pub use projection_dispatch::{ProjectionDispatcher, ProjectionHandler};
pub use tree::InodeId;
