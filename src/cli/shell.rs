use serde_json::{json, Value};
use std::io::Write;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite};
use tracing::debug;

use crate::cli::output::render_tools;
use crate::core::protocol::{JsonMap, SessionClient};
use crate::domain::error::{BridgeError, BridgeResult};

const COMMANDS: &str = "test, led, ir, status, debug, ping, ask, analyze, smart, tools, help, quit";

const HELP: &str = "\
Available commands:
  test    - Test the server connection
  debug   - Run the raw device communication check
  ping    - Ping the device
  led     - Switch the LED (ON/OFF)
  ir      - Read the IR sensor
  status  - Show the device connection status
  ask     - Ask the AI assistant a question
  analyze - AI analysis of the current sensor reading
  smart   - Let the AI set the LED for a scenario
  tools   - List the server's tools
  help    - Show this help
  quit/q  - Exit";

/// Interactive front end for a ready session.
///
/// Reads commands from `input`, turns them into tool calls and prints the
/// decoded results to `out`.
pub struct Shell<I, O> {
    input: I,
    out: O,
    call_timeout: Duration,
}

impl<I, O> Shell<I, O>
where
    I: AsyncBufRead + Unpin,
    O: Write,
{
    pub fn new(input: I, out: O, call_timeout: Duration) -> Self {
        Self {
            input,
            out,
            call_timeout,
        }
    }

    /// Run until `quit` or end of input.
    ///
    /// Failed commands are reported and the loop continues; only a lost
    /// connection or a broken terminal ends the shell with an error.
    pub async fn run<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writeln!(self.out, "Serial Bridge shell")?;
        writeln!(self.out, "Commands: {COMMANDS}")?;
        writeln!(self.out, "{}", "-".repeat(60))?;

        if let Err(e) = self.connection_test(client).await {
            check_recoverable(e)?;
            writeln!(self.out, "Warning: server connection issues detected")?;
        }

        loop {
            let Some(command) = self.prompt("\n> ").await? else {
                writeln!(self.out)?;
                break;
            };

            let outcome = match command.to_lowercase().as_str() {
                "quit" | "exit" | "q" => break,
                "" => continue,
                "help" => {
                    writeln!(self.out, "{HELP}")?;
                    Ok(())
                }
                "test" => self.connection_test(client).await,
                "debug" => self.debug(client).await,
                "ping" => self.ping(client).await,
                "led" => self.led(client).await,
                "ir" => self.ir(client).await,
                "status" => self.status(client).await,
                "ask" => self.ask(client).await,
                "analyze" => self.analyze(client).await,
                "smart" => self.smart(client).await,
                "tools" => self.tools(client).await,
                other => {
                    debug!(command = other, "unknown shell command");
                    writeln!(self.out, "Unknown command. Type 'help' for available commands.")?;
                    Ok(())
                }
            };

            if let Err(e) = outcome {
                check_recoverable(e)?;
            }
        }

        writeln!(self.out, "Goodbye!")?;
        Ok(())
    }

    async fn prompt(&mut self, text: &str) -> BridgeResult<Option<String>> {
        write!(self.out, "{text}")?;
        self.out.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn call<R, W>(
        &mut self,
        client: &mut SessionClient<R, W>,
        tool: &str,
        arguments: Value,
    ) -> BridgeResult<Value>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => JsonMap::new(),
        };

        match client.call_tool(tool, arguments, self.call_timeout).await {
            Ok(result) => Ok(result),
            Err(e) => {
                writeln!(self.out, "Error: {e}")?;
                Err(e.into())
            }
        }
    }

    async fn connection_test<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writeln!(self.out, "Testing server connection...")?;
        match client.list_tools(self.call_timeout).await {
            Ok(tools) => {
                writeln!(self.out, "Server responsive. Found {} tools.", tools.len())?;
                Ok(())
            }
            Err(e) => {
                writeln!(self.out, "Connection test failed: {e}")?;
                Err(e.into())
            }
        }
    }

    async fn tools<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match client.list_tools(self.call_timeout).await {
            Ok(tools) => {
                writeln!(self.out, "Available tools ({}):", tools.len())?;
                writeln!(self.out, "{}", render_tools(&tools))?;
                Ok(())
            }
            Err(e) => {
                writeln!(self.out, "Failed to fetch tools: {e}")?;
                Err(e.into())
            }
        }
    }

    async fn led<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let Some(state) = self.prompt("LED state (ON/OFF): ").await? else {
            return Ok(());
        };
        let state = state.to_uppercase();
        if state != "ON" && state != "OFF" {
            writeln!(self.out, "Invalid state. Use ON or OFF")?;
            return Ok(());
        }

        let result = self.call(client, "led_control", json!({ "state": state })).await?;
        if succeeded(&result) {
            writeln!(self.out, "LED set to {state}")?;
            if let Some(response) = result.get("response").and_then(Value::as_str) {
                writeln!(self.out, "Device response: {response}")?;
            }
        } else {
            writeln!(self.out, "Failed: {}", error_text(&result))?;
        }
        Ok(())
    }

    async fn ir<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.call(client, "read_ir_sensor", json!({})).await?;
        if succeeded(&result) {
            writeln!(
                self.out,
                "IR sensor: {} - {}",
                result["ir_sensor_value"],
                result["interpretation"].as_str().unwrap_or_default()
            )?;
        } else {
            writeln!(self.out, "Failed: {}", error_text(&result))?;
        }
        Ok(())
    }

    async fn status<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.call(client, "get_arduino_status", json!({})).await?;
        if result["connected"].as_bool().unwrap_or(false) {
            writeln!(
                self.out,
                "Device connected on {} at {} baud",
                result["port"].as_str().unwrap_or("unknown port"),
                result["baudrate"]
            )?;
        } else {
            writeln!(self.out, "Device not connected")?;
        }
        Ok(())
    }

    async fn ping<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let result = self.call(client, "test_arduino_communication", json!({})).await?;
        if succeeded(&result) {
            writeln!(
                self.out,
                "Device responded: {}",
                result["response"].as_str().unwrap_or_default()
            )?;
            if let Some(all) = result.get("all_responses").and_then(Value::as_array) {
                if all.len() > 1 {
                    writeln!(self.out, "All responses: {}", Value::Array(all.clone()))?;
                }
            }
        } else {
            writeln!(self.out, "Ping failed: {}", error_text(&result))?;
        }
        Ok(())
    }

    async fn debug<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        writeln!(self.out, "Running device communication check...")?;
        let result = self.call(client, "debug_arduino_raw", json!({})).await?;
        if !succeeded(&result) {
            writeln!(self.out, "Debug failed: {}", error_text(&result))?;
            return Ok(());
        }

        if let Some(results) = result["debug_results"].as_object() {
            for (command, entry) in results {
                writeln!(self.out, "Command: {command}")?;
                match entry["error"].as_str() {
                    Some(error) => writeln!(self.out, "  Error: {error}")?,
                    None => writeln!(self.out, "  Responses: {}", entry["responses"])?,
                }
            }
        }
        Ok(())
    }

    async fn ask<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let question = self.prompt("Ask AI: ").await?.unwrap_or_default();
        if question.is_empty() {
            writeln!(self.out, "Please enter a question")?;
            return Ok(());
        }

        let result = self.call(client, "ask_ai", json!({ "question": question })).await?;
        if succeeded(&result) {
            writeln!(self.out, "AI: {}", result["answer"].as_str().unwrap_or_default())?;
        } else {
            writeln!(self.out, "Failed: {}", error_text(&result))?;
        }
        Ok(())
    }

    async fn analyze<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let reading = self.call(client, "read_ir_sensor", json!({})).await?;
        let Some(ir_value) = reading["ir_sensor_value"].as_i64().filter(|_| succeeded(&reading)) else {
            writeln!(self.out, "Failed to read IR sensor: {}", error_text(&reading))?;
            return Ok(());
        };
        writeln!(self.out, "Current IR value: {ir_value}")?;

        let context = self
            .prompt("Context for analysis (optional): ")
            .await?
            .unwrap_or_default();

        let result = self
            .call(
                client,
                "analyze_sensor_with_ai",
                json!({ "ir_value": ir_value, "context": context }),
            )
            .await?;
        if succeeded(&result) {
            writeln!(
                self.out,
                "AI analysis:\n{}",
                result["ai_analysis"].as_str().unwrap_or_default()
            )?;
        } else {
            writeln!(self.out, "Failed: {}", error_text(&result))?;
        }
        Ok(())
    }

    async fn smart<R, W>(&mut self, client: &mut SessionClient<R, W>) -> BridgeResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let scenario = self.prompt("Describe the scenario: ").await?.unwrap_or_default();
        if scenario.is_empty() {
            writeln!(self.out, "Please describe the scenario")?;
            return Ok(());
        }

        let result = self
            .call(client, "smart_led_control", json!({ "scenario": scenario }))
            .await?;
        if !succeeded(&result) {
            writeln!(self.out, "Failed: {}", error_text(&result))?;
            return Ok(());
        }

        writeln!(self.out, "AI decision: {}", result["ai_decision"].as_str().unwrap_or_default())?;
        writeln!(self.out, "IR sensor was: {}", result["ir_sensor"])?;
        let led_action = &result["led_action"];
        if succeeded(led_action) {
            writeln!(
                self.out,
                "LED set to: {}",
                led_action["led_state"].as_str().unwrap_or_default()
            )?;
        } else {
            writeln!(self.out, "LED control failed: {}", error_text(led_action))?;
        }
        Ok(())
    }
}

/// Swallow errors the session survives; pass the rest up
fn check_recoverable(error: BridgeError) -> BridgeResult<()> {
    match error {
        BridgeError::Session(e) if e.is_recoverable() => Ok(()),
        other => Err(other),
    }
}

fn succeeded(result: &Value) -> bool {
    result["success"].as_bool().unwrap_or(false)
}

fn error_text(result: &Value) -> String {
    match &result["error"] {
        Value::String(text) => text.clone(),
        Value::Null => "Unknown error".to_string(),
        Value::Object(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(error.clone()).to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ai::UnconfiguredBackend;
    use crate::core::device::link::tests::{RecordingClock, ScriptedLine};
    use crate::core::device::{DeviceLink, DeviceTiming};
    use crate::core::protocol::{ProtocolInfo, SessionServer};
    use crate::core::tools::{DeviceToolbox, PortInfo};
    use crate::domain::error::SessionError;
    use tokio::io::{duplex, split, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

    type Client = SessionClient<BufReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>>;

    async fn connect(line: Option<ScriptedLine>) -> Client {
        let (client_io, server_io) = duplex(16 * 1024);

        let link = DeviceLink::with_clock(line, DeviceTiming::default(), RecordingClock::default());
        let port = PortInfo {
            name: Some("/dev/ttyACM0".to_string()),
            baud_rate: 9600,
        };
        let mut server = SessionServer::new(DeviceToolbox::new(link, port, UnconfiguredBackend), "2024-11-05");
        tokio::spawn(async move {
            let (reader, writer) = split(server_io);
            server.serve(BufReader::new(reader), writer).await
        });

        let (reader, writer) = split(client_io);
        let mut client = SessionClient::new(BufReader::new(reader), writer);
        client
            .initialize(&ProtocolInfo::new("2024-11-05", "shell-test"))
            .await
            .unwrap();
        client
    }

    async fn run_script(client: &mut Client, script: &str) -> (BridgeResult<()>, String) {
        let mut out = Vec::new();
        let result = Shell::new(script.as_bytes(), &mut out, Duration::from_secs(5))
            .run(client)
            .await;
        (result, String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_device_commands() {
        let line = ScriptedLine::with_reads(&["IR:1", "LED ON"]);
        let mut client = connect(Some(line)).await;

        let (result, out) = run_script(&mut client, "ir\nstatus\nled\non\nquit\n").await;

        result.unwrap();
        assert!(out.contains("Server responsive. Found 8 tools."), "{out}");
        assert!(out.contains("IR sensor: 1 - Object detected"), "{out}");
        assert!(out.contains("Device connected on /dev/ttyACM0 at 9600 baud"), "{out}");
        assert!(out.contains("LED set to ON"), "{out}");
        assert!(out.contains("Device response: LED ON"), "{out}");
        assert!(out.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn test_failures_are_reported_and_loop_continues() {
        let mut client = connect(None).await;

        let (result, out) = run_script(&mut client, "ir\nled\nblink\nfrobnicate\n\nask\nwhy?\nexit\n").await;

        result.unwrap();
        assert!(out.contains("Failed: Arduino not connected"), "{out}");
        assert!(out.contains("Invalid state. Use ON or OFF"), "{out}");
        assert!(out.contains("Unknown command"), "{out}");
        assert!(out.contains("AI backend not configured"), "{out}");
        assert!(out.contains("Goodbye!"));
    }

    #[tokio::test]
    async fn test_end_of_input_quits() {
        let mut client = connect(None).await;

        let (result, out) = run_script(&mut client, "status\n").await;

        result.unwrap();
        assert!(out.contains("Device not connected"), "{out}");
        assert!(out.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn test_tools_listing() {
        let mut client = connect(None).await;

        let (result, out) = run_script(&mut client, "tools\nq\n").await;

        result.unwrap();
        assert!(out.contains("Available tools (8):"), "{out}");
        assert!(out.contains("smart_led_control"), "{out}");
        assert!(out.contains("scenario"), "{out}");
    }

    #[tokio::test]
    async fn test_lost_connection_ends_shell() {
        let (client_io, server_io) = duplex(4096);

        // Completes the handshake, then hangs up
        tokio::spawn(async move {
            let (reader, mut writer) = split(server_io);
            let mut reader = BufReader::new(reader);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            writer
                .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"protocolVersion\":\"2024-11-05\"}}\n")
                .await
                .unwrap();
            line.clear();
            reader.read_line(&mut line).await.unwrap();
        });

        let (reader, writer) = split(client_io);
        let mut client = SessionClient::new(BufReader::new(reader), writer);
        client
            .initialize(&ProtocolInfo::new("2024-11-05", "shell-test"))
            .await
            .unwrap();

        let (result, out) = run_script(&mut client, "status\n").await;

        assert!(matches!(
            result,
            Err(BridgeError::Session(SessionError::ConnectionLost { .. }))
        ));
        assert!(out.contains("Connection test failed"), "{out}");
    }

    #[test]
    fn test_error_text() {
        assert_eq!(error_text(&json!({"error": "boom"})), "boom");
        assert_eq!(error_text(&json!({"success": false})), "Unknown error");
        assert_eq!(
            error_text(&json!({"error": {"code": -32602, "message": "bad args"}})),
            "bad args"
        );
    }
}
