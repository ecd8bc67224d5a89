//! Graph model mirrored from the audio server
//!
//! Clients, ports and connections are kept in arenas addressed by stable
//! keys. Only the control thread touches the model: it drains the event
//! channel and calls [`GraphModel::apply`] for each record.
//!
//! # Example
//!
//! ```ignore
//! let mut model = GraphModel::new();
//! model.full_resync(&server);
//!
//! while let Some(event) = reader.pop() {
//!     let applied = model.apply(&event, &server);
//!     dirty |= applied.changed;
//! }
//! ```

mod entities;
mod model;
pub mod properties;
mod server;

pub use entities::{
    split_port_name, Client, ClientConnection, ClientKey, Port, PortInfo, PortKey, ServerStatus,
};
pub use model::{Applied, GraphModel};
pub use server::GraphServer;

#[cfg(test)]
pub(crate) use server::memory;
