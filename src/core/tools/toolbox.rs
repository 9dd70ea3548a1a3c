use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::registry::{ToolDescriptor, ToolRegistry};
use crate::core::ai::{AiBackend, Conversation};
use crate::core::device::link::DEFAULT_RETRIES;
use crate::core::device::{parse_reading, Clock, DeviceLink, SerialCommand, SerialLine, TokioClock};
use crate::core::protocol::JsonMap;
use crate::domain::error::ToolError;

/// Commands exercised by `debug_arduino_raw`, in order
const DEBUG_COMMANDS: [&str; 5] = ["PING", "IR?", "LED:ON", "LED:OFF", "STATUS"];

/// Where the device is attached, as reported by the status tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: Option<String>,
    pub baud_rate: u32,
}

/// Tool registry backed by the device link and an AI backend
pub struct DeviceToolbox<L, A, C = TokioClock> {
    link: DeviceLink<L, C>,
    port: PortInfo,
    ai: A,
    conversation: Conversation,
    retries: u32,
}

impl<L, A, C> DeviceToolbox<L, A, C>
where
    L: SerialLine,
    A: AiBackend,
    C: Clock,
{
    pub fn new(link: DeviceLink<L, C>, port: PortInfo, ai: A) -> Self {
        Self {
            link,
            port,
            ai,
            conversation: Conversation::new(),
            retries: DEFAULT_RETRIES,
        }
    }

    /// Attempts per serial command
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries.max(1);
        self
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn command(&self, text: &str) -> SerialCommand {
        SerialCommand::new(text).with_retries(self.retries)
    }

    async fn led_control(&mut self, state: &str) -> Value {
        if !self.link.is_connected() {
            return not_connected();
        }
        if state != "ON" && state != "OFF" {
            return failure("State must be 'ON' or 'OFF'");
        }

        let command = format!("LED:{state}");
        let request = self.command(&command);
        match self.link.send_command(&request).await {
            Ok(lines) => json!({
                "success": true,
                "command": command,
                "response": first_or_placeholder(&lines),
                "led_state": state,
            }),
            Err(e) => failure(e),
        }
    }

    async fn read_ir_sensor(&mut self) -> Value {
        if !self.link.is_connected() {
            return not_connected();
        }

        let request = self.command("IR?");
        let lines = match self.link.send_command(&request).await {
            Ok(lines) => lines,
            Err(e) => return failure(e),
        };

        let raw = lines.first().map(String::as_str).unwrap_or_default();
        match parse_reading(raw) {
            Ok(value) => json!({
                "success": true,
                "ir_sensor_value": value,
                "interpretation": if value == 1 { "Object detected" } else { "No object detected" },
                "raw_response": raw,
            }),
            Err(e) => failure(e),
        }
    }

    async fn test_communication(&mut self) -> Value {
        if !self.link.is_connected() {
            return not_connected();
        }

        let request = self.command("PING");
        match self.link.send_command(&request).await {
            Ok(lines) => json!({
                "success": true,
                "response": first_or_placeholder(&lines),
                "all_responses": lines,
            }),
            Err(e) => failure(e),
        }
    }

    fn status(&self) -> Value {
        let mut status = json!({
            "connected": self.link.is_connected(),
            "port": self.port.name,
            "baudrate": self.port.baud_rate,
        });

        if self.link.is_connected() {
            status["is_open"] = true.into();
            status["timeout"] = self.link.timing().read_timeout.as_secs_f64().into();
        }
        status
    }

    async fn debug_raw(&mut self) -> Value {
        if !self.link.is_connected() {
            return not_connected();
        }

        let mut results = JsonMap::new();
        for command in DEBUG_COMMANDS {
            let request = self.command(command);
            let entry = match self.link.send_command(&request).await {
                Ok(lines) => json!({ "responses": lines, "error": null }),
                Err(e) => json!({ "responses": null, "error": e.to_string() }),
            };
            results.insert(command.to_string(), entry);
        }

        json!({ "success": true, "debug_results": results })
    }

    async fn ask_ai(&mut self, question: &str) -> Value {
        match self.ai.ask(&mut self.conversation, question).await {
            Ok(answer) => json!({ "success": true, "question": question, "answer": answer }),
            Err(e) => failure(e),
        }
    }

    async fn analyze_sensor(&mut self, ir_value: i64, context: &str) -> Value {
        let prompt = format!(
            "Analyze this IR sensor reading from an Arduino.\n\
             IR sensor value: {ir_value} (0 = no object detected, 1 = object detected)\n\
             Context: {}\n\n\
             Explain what the reading means, suggest possible actions and note any safety \
             considerations. Keep the answer concise and practical.",
            if context.is_empty() { "General sensing" } else { context },
        );

        match self.ai.ask(&mut self.conversation, &prompt).await {
            Ok(analysis) => json!({
                "success": true,
                "ir_value": ir_value,
                "context": context,
                "ai_analysis": analysis,
            }),
            Err(e) => failure(e),
        }
    }

    async fn smart_led_control(&mut self, scenario: &str) -> Value {
        let reading = self.read_ir_sensor().await;
        let Some(ir_value) = reading.get("ir_sensor_value").and_then(Value::as_i64) else {
            return reading;
        };

        let prompt = format!(
            "You are controlling an Arduino with an LED and an IR sensor.\n\
             IR sensor: {ir_value} (0 = no object, 1 = object detected)\n\
             Scenario: {scenario}\n\n\
             Should the LED be ON or OFF? Start your answer with exactly \"LED:ON\" or \
             \"LED:OFF\", followed by your reason."
        );

        let decision = match self.ai.ask(&mut self.conversation, &prompt).await {
            Ok(decision) => decision,
            Err(e) => return failure(e),
        };

        let state = decide_led_state(&decision);
        info!(scenario, ir_value, state, "AI chose LED state");
        let led_action = self.led_control(state).await;

        json!({
            "success": true,
            "scenario": scenario,
            "ir_sensor": ir_value,
            "ai_decision": decision,
            "led_action": led_action,
        })
    }
}

#[async_trait]
impl<L, A, C> ToolRegistry for DeviceToolbox<L, A, C>
where
    L: SerialLine,
    A: AiBackend,
    C: Clock,
{
    fn list_tools(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("led_control", "Control the LED on the Arduino (ON/OFF)")
                .param("state", "string", "Either ON or OFF", true),
            ToolDescriptor::new("read_ir_sensor", "Read the IR sensor value from the Arduino"),
            ToolDescriptor::new(
                "test_arduino_communication",
                "Test Arduino communication with a simple ping",
            ),
            ToolDescriptor::new("get_arduino_status", "Get the Arduino connection status"),
            ToolDescriptor::new(
                "debug_arduino_raw",
                "Send a fixed set of raw commands and report every response",
            ),
            ToolDescriptor::new("ask_ai", "Ask the AI assistant anything")
                .param("question", "string", "Question for the assistant", true),
            ToolDescriptor::new(
                "analyze_sensor_with_ai",
                "Use the AI assistant to analyze an IR sensor reading and suggest actions",
            )
            .param("ir_value", "integer", "IR sensor reading (0 or 1)", true)
            .param("context", "string", "What the sensor is used for", false),
            ToolDescriptor::new(
                "smart_led_control",
                "Let the AI assistant set the LED based on the IR sensor and a scenario",
            )
            .param("scenario", "string", "Description of the situation", true),
        ]
    }

    async fn call_tool(&mut self, name: &str, arguments: &JsonMap) -> Result<Value, ToolError> {
        debug!(tool = name, "dispatching tool");

        let result = match name {
            "led_control" => {
                let state = required_str(name, arguments, "state")?;
                self.led_control(state).await
            }
            "read_ir_sensor" => self.read_ir_sensor().await,
            "test_arduino_communication" => self.test_communication().await,
            "get_arduino_status" => self.status(),
            "debug_arduino_raw" => self.debug_raw().await,
            "ask_ai" => {
                let question = required_str(name, arguments, "question")?;
                self.ask_ai(question).await
            }
            "analyze_sensor_with_ai" => {
                let ir_value = arguments
                    .get("ir_value")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| invalid(name, "'ir_value' must be an integer"))?;
                let context = arguments.get("context").and_then(Value::as_str).unwrap_or_default();
                self.analyze_sensor(ir_value, context).await
            }
            "smart_led_control" => {
                let scenario = required_str(name, arguments, "scenario")?;
                self.smart_led_control(scenario).await
            }
            other => return Err(ToolError::UnknownTool(other.to_string())),
        };

        Ok(result)
    }
}

/// Turn an AI reply into an LED state.
///
/// A reply that starts with `LED:ON` or `LED:OFF` (any case) decides
/// directly. Otherwise the answer is OFF when "OFF" appears before any "ON",
/// and ON in every other case.
///
/// A reply mentioning "OFF" but never "ON" deliberately resolves to OFF,
/// not to the ON fallback.
pub fn decide_led_state(reply: &str) -> &'static str {
    let upper = reply.trim().to_uppercase();
    if upper.starts_with("LED:ON") {
        return "ON";
    }
    if upper.starts_with("LED:OFF") {
        return "OFF";
    }

    match (upper.find("OFF"), upper.find("ON")) {
        (Some(off), Some(on)) if off < on => "OFF",
        (Some(_), None) => "OFF",
        _ => "ON",
    }
}

fn required_str<'a>(tool: &str, arguments: &'a JsonMap, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(tool, &format!("'{key}' must be a string")))
}

fn invalid(tool: &str, message: &str) -> ToolError {
    ToolError::InvalidArguments {
        tool: tool.to_string(),
        message: message.to_string(),
    }
}

fn failure(error: impl std::fmt::Display) -> Value {
    json!({ "success": false, "error": error.to_string() })
}

fn not_connected() -> Value {
    failure("Arduino not connected")
}

fn first_or_placeholder(lines: &[String]) -> &str {
    lines.first().map(String::as_str).unwrap_or("No response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::UnconfiguredBackend;
    use crate::core::device::link::tests::{RecordingClock, ScriptedLine};
    use crate::core::device::DeviceTiming;
    use crate::domain::error::AiError;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Backend that replays canned answers and records prompts
    #[derive(Default)]
    struct CannedAi {
        replies: Mutex<VecDeque<String>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl CannedAi {
        fn replying(replies: &[&str]) -> Self {
            Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl AiBackend for CannedAi {
        async fn ask(&self, conversation: &mut Conversation, prompt: &str) -> Result<String, AiError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AiError::InvalidResponse("no canned reply".to_string()))?;
            conversation.record(prompt, reply.clone());
            Ok(reply)
        }
    }

    type Toolbox<A> = DeviceToolbox<ScriptedLine, A, RecordingClock>;

    fn port() -> PortInfo {
        PortInfo {
            name: Some("/dev/ttyACM0".to_string()),
            baud_rate: 9600,
        }
    }

    fn toolbox<A: AiBackend>(line: Option<ScriptedLine>, ai: A) -> Toolbox<A> {
        let link = DeviceLink::with_clock(line, DeviceTiming::default(), RecordingClock::default());
        DeviceToolbox::new(link, port(), ai)
    }

    fn args(value: Value) -> JsonMap {
        match value {
            Value::Object(map) => map,
            _ => panic!("arguments must be an object"),
        }
    }

    #[tokio::test]
    async fn test_catalog() {
        let toolbox = toolbox(None, UnconfiguredBackend);
        let names: Vec<String> = toolbox.list_tools().into_iter().map(|t| t.name).collect();

        assert_eq!(
            names,
            vec![
                "led_control",
                "read_ir_sensor",
                "test_arduino_communication",
                "get_arduino_status",
                "debug_arduino_raw",
                "ask_ai",
                "analyze_sensor_with_ai",
                "smart_led_control",
            ]
        );
    }

    #[tokio::test]
    async fn test_led_control() {
        let line = ScriptedLine::with_reads(&["LED ON"]);
        let writes = Arc::clone(&line.writes);
        let mut toolbox = toolbox(Some(line), UnconfiguredBackend);

        let result = toolbox
            .call_tool("led_control", &args(json!({"state": "ON"})))
            .await
            .unwrap();

        assert_eq!(
            result,
            json!({"success": true, "command": "LED:ON", "response": "LED ON", "led_state": "ON"})
        );
        assert_eq!(*writes.lock().unwrap(), vec!["LED:ON".to_string()]);
    }

    #[tokio::test]
    async fn test_led_control_rejects_bad_state() {
        let mut toolbox = toolbox(Some(ScriptedLine::default()), UnconfiguredBackend);

        let result = toolbox
            .call_tool("led_control", &args(json!({"state": "BLINK"})))
            .await
            .unwrap();
        assert_eq!(result["success"], false);

        let missing = toolbox.call_tool("led_control", &JsonMap::new()).await;
        assert!(matches!(missing, Err(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_read_ir_sensor_formats() {
        for (raw, expected) in [("1", 1), ("IR:0", 0), ("IR_VALUE: 1", 1)] {
            let mut toolbox = toolbox(Some(ScriptedLine::with_reads(&[raw])), UnconfiguredBackend);

            let result = toolbox.call_tool("read_ir_sensor", &JsonMap::new()).await.unwrap();

            assert_eq!(result["success"], true, "{raw}");
            assert_eq!(result["ir_sensor_value"], expected);
            assert_eq!(result["raw_response"], raw.trim());
        }
    }

    #[tokio::test]
    async fn test_read_ir_sensor_unparseable() {
        let mut toolbox = toolbox(Some(ScriptedLine::with_reads(&["abc"])), UnconfiguredBackend);

        let result = toolbox.call_tool("read_ir_sensor", &JsonMap::new()).await.unwrap();

        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn test_disconnected_device() {
        let mut toolbox = toolbox(None, UnconfiguredBackend);

        for tool in ["read_ir_sensor", "test_arduino_communication", "debug_arduino_raw"] {
            let result = toolbox.call_tool(tool, &JsonMap::new()).await.unwrap();
            assert_eq!(result, json!({"success": false, "error": "Arduino not connected"}), "{tool}");
        }

        let status = toolbox.call_tool("get_arduino_status", &JsonMap::new()).await.unwrap();
        assert_eq!(status["connected"], false);
        assert!(status.get("is_open").is_none());
    }

    #[tokio::test]
    async fn test_status_when_connected() {
        let mut toolbox = toolbox(Some(ScriptedLine::default()), UnconfiguredBackend);

        let status = toolbox.call_tool("get_arduino_status", &JsonMap::new()).await.unwrap();

        assert_eq!(status["connected"], true);
        assert_eq!(status["port"], "/dev/ttyACM0");
        assert_eq!(status["baudrate"], 9600);
        assert_eq!(status["is_open"], true);
        assert_eq!(status["timeout"], 2.0);
    }

    #[tokio::test]
    async fn test_silent_device_reports_failure() {
        let mut toolbox = toolbox(Some(ScriptedLine::default()), UnconfiguredBackend);

        let result = toolbox.call_tool("test_arduino_communication", &JsonMap::new()).await.unwrap();

        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("PING"));
    }

    #[tokio::test]
    async fn test_debug_runs_every_command() {
        let line = ScriptedLine::with_reads(&["PONG", "IR:1", "OK", "OK", "READY"]);
        let writes = Arc::clone(&line.writes);
        let mut toolbox = toolbox(Some(line), UnconfiguredBackend);

        let result = toolbox.call_tool("debug_arduino_raw", &JsonMap::new()).await.unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["debug_results"]["IR?"]["responses"], json!(["IR:1"]));
        assert_eq!(result["debug_results"]["STATUS"]["error"], Value::Null);
        assert_eq!(*writes.lock().unwrap(), DEBUG_COMMANDS.map(String::from).to_vec());

        let order: Vec<&str> = result["debug_results"]
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(order, DEBUG_COMMANDS);
    }

    #[tokio::test]
    async fn test_ask_ai_keeps_history() {
        let mut toolbox = toolbox(None, CannedAi::replying(&["Forty-two", "Still forty-two"]));

        let first = toolbox
            .call_tool("ask_ai", &args(json!({"question": "Meaning of life?"})))
            .await
            .unwrap();
        toolbox
            .call_tool("ask_ai", &args(json!({"question": "Sure?"})))
            .await
            .unwrap();

        assert_eq!(first["answer"], "Forty-two");
        assert_eq!(toolbox.conversation().len(), 4);
    }

    #[tokio::test]
    async fn test_ai_unconfigured() {
        let mut toolbox = toolbox(None, UnconfiguredBackend);

        let result = toolbox
            .call_tool("ask_ai", &args(json!({"question": "hello"})))
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert!(toolbox.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_analyze_sensor_prompt() {
        let ai = CannedAi::replying(&["Something is in front of the sensor."]);
        let prompts = Arc::clone(&ai.prompts);
        let mut toolbox = toolbox(None, ai);

        let result = toolbox
            .call_tool("analyze_sensor_with_ai", &args(json!({"ir_value": 1})))
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["context"], "");
        assert!(prompts.lock().unwrap()[0].contains("General sensing"));

        let bad = toolbox
            .call_tool("analyze_sensor_with_ai", &args(json!({"ir_value": "one"})))
            .await;
        assert!(matches!(bad, Err(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_smart_led_control() {
        let line = ScriptedLine::with_reads(&["IR:1", "LED OFF"]);
        let writes = Arc::clone(&line.writes);
        let mut toolbox = toolbox(Some(line), CannedAi::replying(&["led:off because it is daytime"]));

        let result = toolbox
            .call_tool("smart_led_control", &args(json!({"scenario": "sunny room"})))
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["ir_sensor"], 1);
        assert_eq!(result["led_action"]["led_state"], "OFF");
        assert_eq!(*writes.lock().unwrap(), vec!["IR?".to_string(), "LED:OFF".to_string()]);
    }

    #[tokio::test]
    async fn test_smart_led_control_stops_on_sensor_failure() {
        let ai = CannedAi::replying(&["LED:ON"]);
        let prompts = Arc::clone(&ai.prompts);
        let mut toolbox = toolbox(None, ai);

        let result = toolbox
            .call_tool("smart_led_control", &args(json!({"scenario": "night"})))
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert!(prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let mut toolbox = toolbox(None, UnconfiguredBackend);

        let result = toolbox.call_tool("self_destruct", &JsonMap::new()).await;
        assert_eq!(result, Err(ToolError::UnknownTool("self_destruct".to_string())));
    }

    #[tokio::test]
    async fn test_configured_retries_bound_attempts() {
        let line = ScriptedLine::default();
        let writes = Arc::clone(&line.writes);
        let mut toolbox = toolbox(Some(line), UnconfiguredBackend).with_retries(1);

        let result = toolbox
            .call_tool("test_arduino_communication", &JsonMap::new())
            .await
            .unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(writes.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_decide_led_state() {
        assert_eq!(decide_led_state("LED:ON - it is dark"), "ON");
        assert_eq!(decide_led_state("  led:off, nobody around"), "OFF");
        assert_eq!(decide_led_state("Turn it OFF, then ON later"), "OFF");
        assert_eq!(decide_led_state("Switch it off"), "OFF");
        assert_eq!(decide_led_state("Keep the light on, not off"), "ON");
        assert_eq!(decide_led_state("No idea"), "ON");
    }
}
