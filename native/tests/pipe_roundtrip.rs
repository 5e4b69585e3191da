// End-to-end command round trips over a real named pipe (Windows only).

#![cfg(windows)]

use std::time::{Duration, Instant};

use energy_performance::affinity::{
    AffinityController, AffinityError, AffinityMask, ApplyError, CoreTopology,
    ProcessAffinitySink, ProcessEntry, TopologyProvider,
};
use energy_performance::ipc::{CoreServiceClient, CpuHandler, PipeClient, PipeServer};

struct FixedProvider(CoreTopology);

impl TopologyProvider for FixedProvider {
    fn detect(&self) -> Result<CoreTopology, AffinityError> {
        Ok(self.0)
    }
}

struct ListSink(Vec<ProcessEntry>);

impl ProcessAffinitySink for ListSink {
    fn snapshot(&self) -> Result<Vec<ProcessEntry>, AffinityError> {
        Ok(self.0.clone())
    }

    fn set_affinity(&self, _: &ProcessEntry, _: AffinityMask) -> Result<(), ApplyError> {
        Ok(())
    }
}

fn unique_pipe_name(test: &str) -> String {
    format!(r"\\.\pipe\ep-test-{}-{}", std::process::id(), test)
}

fn start_server(pipe_name: &str, processes: Vec<ProcessEntry>) -> PipeServer {
    let controller = AffinityController::new(
        Box::new(FixedProvider(CoreTopology::new(16, 4, 6))),
        Box::new(ListSink(processes)),
    );

    let mut server = PipeServer::new(pipe_name);
    server.set_accept_poll(Duration::from_millis(50));
    server.add_message_handler(Box::new(CpuHandler::new(controller)));
    server.start().expect("pipe server should start");
    server
}

#[test]
fn test_total_core_count_round_trip() {
    let pipe_name = unique_pipe_name("total");
    let mut server = start_server(&pipe_name, vec![]);

    let raw = PipeClient::new(pipe_name.as_str())
        .unwrap()
        .send_and_receive_message("TotalCoreCount")
        .unwrap();
    assert_eq!(raw, "16");

    let client = CoreServiceClient::new(pipe_name.as_str()).unwrap();
    assert_eq!(client.total_core_count().unwrap(), 16);
    assert_eq!(client.efficiency_core_count().unwrap(), 4);
    assert_eq!(client.performance_core_count().unwrap(), 6);

    server.stop();
}

#[test]
fn test_unknown_command_yields_failure_token() {
    let pipe_name = unique_pipe_name("unknown");
    let mut server = start_server(&pipe_name, vec![]);

    let raw = PipeClient::new(pipe_name.as_str())
        .unwrap()
        .send_and_receive_message("Frobnicate")
        .unwrap();
    assert_eq!(raw, "failed");

    server.stop();
}

#[test]
fn test_move_app_round_trip() {
    let pipe_name = unique_pipe_name("moveapp");
    let processes = vec![ProcessEntry {
        pid: 42,
        name: "game.exe".into(),
    }];
    let mut server = start_server(&pipe_name, processes);

    let client = CoreServiceClient::new(pipe_name.as_str()).unwrap();
    assert!(client.move_app_to_hybrid_cores("game.exe", 2, 4).unwrap());
    assert!(!client.move_app_to_hybrid_cores("missing.exe", 2, 4).unwrap());

    // Fire-and-forget commands complete without error against the
    // snapshot, even an empty one.
    client.move_all_apps_to_hybrid_cores(2, 4).unwrap();
    client.reset_to_default_cores().unwrap();

    server.stop();
}

#[test]
fn test_back_to_back_clients_are_serialized() {
    let pipe_name = unique_pipe_name("serial");
    let mut server = start_server(&pipe_name, vec![]);

    let name_a = pipe_name.clone();
    let name_b = pipe_name.clone();
    let a = std::thread::spawn(move || {
        CoreServiceClient::new(name_a.as_str())
            .unwrap()
            .total_core_count()
            .unwrap()
    });
    let b = std::thread::spawn(move || {
        CoreServiceClient::new(name_b.as_str())
            .unwrap()
            .efficiency_core_count()
            .unwrap()
    });

    // Both responses arrive well-formed; neither is interleaved with the
    // other even though the server handles one connection at a time.
    assert_eq!(a.join().unwrap(), 16);
    assert_eq!(b.join().unwrap(), 4);

    server.stop();
}

#[test]
fn test_stop_joins_within_poll_interval() {
    let pipe_name = unique_pipe_name("stop");
    let mut server = start_server(&pipe_name, vec![]);
    assert!(server.is_running());

    let started = Instant::now();
    server.stop();
    assert!(!server.is_running());
    assert!(started.elapsed() < Duration::from_secs(2));
}
