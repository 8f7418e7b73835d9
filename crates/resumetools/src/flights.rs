//! Flight-booking tool set
//!
//! Every side effect runs inside a recorded step, so a re-driven run never
//! searches, books, or fetches twice. Approval is a hook keyed by the model's
//! tool-call id; whoever answers the approval request uses that id as token.

use crate::{Fetcher, ToolConfig};
use async_trait::async_trait;
use resumecore::{
    FieldType, HookPayload, Message, PayloadSchema, RunError, ToolCallRequest, ToolSpec,
};
use resumeruntime::{AgentTools, RunContext, ToolOutcome};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchFlights {
    pub from: String,
    pub to: String,
    pub date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookFlight {
    pub flight_id: String,
    pub passenger_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub flight_number: String,
    pub passenger_name: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetWeather {
    pub city: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchData {
    pub url: String,
}

/// A parsed tool call
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "name", content = "input", rename_all = "camelCase")]
pub enum FlightTool {
    SearchFlights(SearchFlights),
    BookFlight(BookFlight),
    BookingApproval(BookingRequest),
    GetWeather(GetWeather),
    FetchData(FetchData),
}

impl FlightTool {
    pub const NAMES: [&'static str; 5] = [
        "searchFlights",
        "bookingApproval",
        "bookFlight",
        "getWeather",
        "fetchData",
    ];

    pub fn parse(call: &ToolCallRequest) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "name": call.name,
            "input": call.input,
        }))
    }
}

/// Human decision on a booking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingApproval {
    pub approved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl HookPayload for BookingApproval {
    fn schema() -> PayloadSchema {
        PayloadSchema::object()
            .required("approved", FieldType::Boolean)
            .optional("comment", FieldType::String)
    }
}

impl BookingApproval {
    /// Text fed back to the model for this decision.
    pub fn describe(&self, request: &BookingRequest) -> String {
        let comment = self.comment.as_deref().filter(|c| !c.is_empty());
        if !self.approved {
            return format!("Booking rejected: {}", comment.unwrap_or("No reason provided"));
        }
        match comment {
            Some(note) => format!(
                "Booking approved for {} on flight {} - Note: {}",
                request.passenger_name, request.flight_number, note
            ),
            None => format!(
                "Booking approved for {} on flight {}",
                request.passenger_name, request.flight_number
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flight {
    pub id: String,
    pub airline: String,
    pub price: String,
    pub departure: String,
}

fn available_flights() -> Vec<Flight> {
    vec![
        Flight {
            id: "FL-101".into(),
            airline: "SilentAir".into(),
            price: "$250".into(),
            departure: "10:00 AM".into(),
        },
        Flight {
            id: "FL-202".into(),
            airline: "BotAir".into(),
            price: "$180".into(),
            departure: "06:00 PM".into(),
        },
    ]
}

fn ticket_id() -> String {
    format!("TKT-{}", uuid::Uuid::new_v4().as_u128() % 10_000)
}

/// The assistant's tools
#[derive(Clone)]
pub struct FlightTools {
    config: ToolConfig,
    fetcher: Arc<dyn Fetcher>,
}

impl FlightTools {
    pub fn new(config: ToolConfig, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { config, fetcher }
    }

    async fn dispatch(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
        tool: FlightTool,
        history: &[Message],
    ) -> Result<ToolOutcome, RunError> {
        match tool {
            FlightTool::SearchFlights(args) => {
                let latency = self.config.search_latency;
                let flights: String = ctx
                    .step("searchFlights", args, |args| async move {
                        tracing::info!(
                            "Searching flights from {} to {} on {}",
                            args.from,
                            args.to,
                            args.date
                        );
                        tokio::time::sleep(latency).await;
                        serde_json::to_string(&available_flights()).map_err(RunError::from)
                    })
                    .await?;
                Ok(ToolOutcome::ok(flights))
            }
            FlightTool::BookFlight(args) => {
                let booking: String = ctx
                    .step("bookFlight", args, |args| async move {
                        tracing::info!("Booking flight {} for {}", args.flight_id, args.passenger_name);
                        Ok(serde_json::json!({
                            "status": "confirmed",
                            "ticketId": ticket_id(),
                        })
                        .to_string())
                    })
                    .await?;
                Ok(ToolOutcome::ok(booking))
            }
            FlightTool::BookingApproval(request) => {
                let decision: BookingApproval = ctx.hook(&call.id).await?;
                tracing::info!(
                    "Booking of {} for {} approved: {}",
                    request.flight_number,
                    request.passenger_name,
                    decision.approved
                );
                Ok(ToolOutcome::ok(decision.describe(&request)))
            }
            FlightTool::GetWeather(args) => {
                let history_len = history.len();
                let report: String = ctx
                    .step("getWeather", args, |args| async move {
                        tracing::info!(
                            "Getting weather for {}. History length: {}",
                            args.city,
                            history_len
                        );
                        Ok(format!("Weather in {} is currently 72°F and sunny.", args.city))
                    })
                    .await?;
                Ok(ToolOutcome::ok(report))
            }
            FlightTool::FetchData(args) => {
                let fetcher = self.fetcher.clone();
                let body: serde_json::Value = ctx
                    .step("fetchData", args, |args| async move {
                        fetcher.fetch_json(&args.url).await
                    })
                    .await?;
                tracing::info!(
                    "Run {} fetched data, sleeping {:?}",
                    ctx.run_id(),
                    self.config.fetch_delay
                );
                ctx.sleep(self.config.fetch_delay).await?;
                Ok(ToolOutcome::ok(body.to_string()))
            }
        }
    }
}

#[async_trait]
impl AgentTools for FlightTools {
    fn specs(&self) -> Vec<ToolSpec> {
        let spec = |name: &str, description: &str, parameters: PayloadSchema| ToolSpec {
            name: name.to_string(),
            description: description.to_string(),
            parameters: parameters.json_schema(),
        };

        vec![
            spec(
                "searchFlights",
                "Search for flights between cities on a specific date",
                PayloadSchema::object()
                    .described("from", FieldType::String, "Departure city")
                    .described("to", FieldType::String, "Destination city")
                    .described("date", FieldType::String, "Date of travel YYYY-MM-DD"),
            ),
            spec(
                "bookingApproval",
                "Request human approval before booking a flight",
                PayloadSchema::object()
                    .described("flightNumber", FieldType::String, "Flight number to book")
                    .described("passengerName", FieldType::String, "Name of the passenger")
                    .described("price", FieldType::Number, "Total price of the booking"),
            ),
            spec(
                "bookFlight",
                "Book a specific flight",
                PayloadSchema::object()
                    .described("flightId", FieldType::String, "The flight ID to book")
                    .described("passengerName", FieldType::String, "Name of the passenger"),
            ),
            spec(
                "getWeather",
                "Get the current weather for a city",
                PayloadSchema::object().described(
                    "city",
                    FieldType::String,
                    "The city to get weather for",
                ),
            ),
            spec(
                "fetchData",
                "Fetch data from a URL with a mandatory 5s delay",
                PayloadSchema::object().described("url", FieldType::String, "The URL to fetch"),
            ),
        ]
    }

    async fn call(
        &self,
        ctx: &RunContext,
        call: &ToolCallRequest,
        history: &[Message],
    ) -> Result<ToolOutcome, RunError> {
        if !FlightTool::NAMES.contains(&call.name.as_str()) {
            tracing::warn!("Model requested unknown tool {}", call.name);
            return Ok(ToolOutcome::error(format!("Unknown tool: {}", call.name)));
        }
        let tool = match FlightTool::parse(call) {
            Ok(tool) => tool,
            Err(e) => {
                return Ok(ToolOutcome::error(format!(
                    "Invalid arguments for {}: {}",
                    call.name, e
                )))
            }
        };
        self.dispatch(ctx, call, tool, history).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, input: serde_json::Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call-1".into(),
            name: name.into(),
            input,
        }
    }

    #[test]
    fn parses_tool_calls_by_name() {
        let tool = FlightTool::parse(&call(
            "bookingApproval",
            json!({"flightNumber": "FL-202", "passengerName": "Ada", "price": 180}),
        ))
        .unwrap();
        assert_eq!(
            tool,
            FlightTool::BookingApproval(BookingRequest {
                flight_number: "FL-202".into(),
                passenger_name: "Ada".into(),
                price: 180.0,
            })
        );
        assert!(FlightTool::parse(&call("getWeather", json!({"town": "Oslo"}))).is_err());
    }

    #[test]
    fn describes_approval_decisions() {
        let request = BookingRequest {
            flight_number: "FL-101".into(),
            passenger_name: "Grace".into(),
            price: 250.0,
        };
        let approved = BookingApproval {
            approved: true,
            comment: None,
        };
        assert_eq!(
            approved.describe(&request),
            "Booking approved for Grace on flight FL-101"
        );
        let noted = BookingApproval {
            approved: true,
            comment: Some("window seat".into()),
        };
        assert_eq!(
            noted.describe(&request),
            "Booking approved for Grace on flight FL-101 - Note: window seat"
        );
        let rejected = BookingApproval {
            approved: false,
            comment: None,
        };
        assert_eq!(rejected.describe(&request), "Booking rejected: No reason provided");
    }

    #[test]
    fn ticket_ids_are_short() {
        let id = ticket_id();
        let n: u32 = id.trim_start_matches("TKT-").parse().unwrap();
        assert!(n < 10_000);
    }
}
