// engine module: batch service backend

pub mod http;
mod interface;
pub mod stub;

pub use http::HttpEngine;
pub use interface::{
    ActionParams, BatchPayload, DispatchId, Engine, EngineHandle, Event, Request, Retention,
};
pub use stub::StubEngine;
