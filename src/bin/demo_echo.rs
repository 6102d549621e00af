// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Echo service demo, self-contained in one process:
// - spawns a supervisor with a one-entry services table,
// - runs an echo service with a 2-second idle budget,
// - sends it a few messages from a client thread and prints the replies.
//
// The service exits on its own once the client goes quiet.

use std::thread;
use std::time::Duration;

use libsvc::{
    protocol, MailMode, Mailbox, Message, ReplyBuffer, RunExit, Service, ServiceConfig,
    Supervisor, SupervisorConfig,
};

fn main() {
    let pid = std::process::id();
    let domain = format!("demo_{pid}");
    let endpoint = format!("demo_echo_ep_{pid}");

    let mut sup_cfg = SupervisorConfig::new(&domain);
    sup_cfg.services.insert("echo".to_owned(), endpoint.clone());
    let _supervisor = Supervisor::spawn(sup_cfg).expect("spawn supervisor");

    let client = thread::spawn(move || {
        let reply_name = format!("demo_echo_rply_{pid}");
        let mut replies = Mailbox::connect(&reply_name, protocol::REPLY_SLOT_SIZE, MailMode::Receiver)
            .expect("reply channel");
        let mut tx = Mailbox::connect(&endpoint, 0, MailMode::Sender).expect("endpoint sender");

        for text in ["hello", "echo", "goodbye"] {
            tx.post(text.as_bytes(), Some(&reply_name), 1000)
                .expect("post");
            match replies.recv(Some(2000)).expect("recv reply") {
                Some(msg) => println!("client: got `{}`", String::from_utf8_lossy(msg.payload())),
                None => println!("client: reply timed out"),
            }
            thread::sleep(Duration::from_millis(200));
        }
    });

    let mut cfg = ServiceConfig::default();
    cfg.domain = domain;
    cfg.idle_interval = Duration::from_secs(2);
    let service = Service::new("echo", cfg);

    let mut handler = |msg: &Message, reply: &mut ReplyBuffer| {
        println!("service: echoing {} bytes", msg.payload().len());
        reply.set(msg.payload());
        true
    };

    match service.run(&mut handler) {
        Ok(RunExit::Idle) => println!("service: idle, shut down"),
        Ok(RunExit::Stopped) => println!("service: stopped"),
        Err(e) => eprintln!("service: {e}"),
    }

    client.join().unwrap();
}
