//! Flight-booking assistant
//!
//! The chat workflow, its tools, and the providers it talks to.

mod chat;
mod config;
mod flights;
mod http;
mod provider;

pub use chat::{ChatInput, ChatWorkflow, CHAT_WORKFLOW, DEFAULT_SYSTEM_PROMPT};
pub use config::ToolConfig;
pub use flights::{
    BookFlight, BookingApproval, BookingRequest, FetchData, Flight, FlightTool, FlightTools,
    GetWeather, SearchFlights,
};
pub use http::{Fetcher, HttpFetcher};
pub use provider::ChatCompletionsModel;
