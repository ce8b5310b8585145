// src/control/mod.rs
// Line-delimited JSON control surface for the worker supervisor
//
// One request line in, one response line out:
//   {"op":"start","id":"1","params":{"channel":"room-1","graph":"voice_assistant","timeout":60}}
//   {"id":"1","ok":true,"status":"ok","result":{...}}

mod handler;
mod protocol;

pub use handler::{dispatch, handle_request, serve_stream};
pub use protocol::{ControlRequest, ControlResponse, ControlStatus};
