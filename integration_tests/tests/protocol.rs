mod common;

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

use anyhow::Result;
use jenga_protocol::{BlockColor, GameEvent};

#[test]
fn remove_then_count_over_socket() -> Result<()> {
    let harness = common::spawn_server();
    let client = &harness.client;

    assert_eq!(client.send_line("get_num_of_blocks_in_level 1")?, "3");
    assert_eq!(client.send_line("remove 1 y")?, "ACK");
    assert_eq!(client.send_line("get_num_of_blocks_in_level 1")?, "2");

    assert_eq!(client.send_line("remove 1 y")?, "ACK");
    assert_eq!(client.send_line("get_num_of_blocks_in_level 1")?, "2");

    assert_eq!(
        harness.events.next(),
        Some(GameEvent::FinishedMove {
            level: 1,
            color: BlockColor::Yellow
        })
    );
    harness.server.shutdown();
    Ok(())
}

#[test]
fn unknown_and_malformed_commands() -> Result<()> {
    let harness = common::spawn_server();
    let client = &harness.client;

    assert_eq!(client.send_line("foo bar")?, "Unknown command");
    assert_eq!(client.send_line("reset now")?, "Unknown command");
    assert_eq!(client.send_line("remove 1")?, "ACK");
    assert_eq!(
        client.send_line("get_num_of_blocks_in_level top")?,
        "Invalid level value"
    );
    assert_eq!(client.send_line("get_num_of_blocks_in_level 9")?, "0");
    for level in 0..3 {
        assert_eq!(client.blocks_in_level(level)?, Some(3));
    }
    harness.server.shutdown();
    Ok(())
}

#[test]
fn revert_over_socket() -> Result<()> {
    let harness = common::spawn_server();
    let client = &harness.client;

    assert!(!client.revert_step()?);
    assert_eq!(client.remove(2, BlockColor::Green)?, "ACK");
    assert_eq!(client.blocks_in_level(2)?, Some(2));

    assert_eq!(client.send_line("revert_step")?, "Step reverted.");
    assert_eq!(client.blocks_in_level(2)?, Some(3));
    assert_eq!(client.send_line("revert_step")?, "Nothing to revert.");
    assert!(!client.is_fallen()?);
    harness.server.shutdown();
    Ok(())
}

#[test]
fn one_connection_serves_commands_in_order() -> Result<()> {
    let harness = common::spawn_server();
    let mut stream = TcpStream::connect(harness.server.command_addr())?;
    stream.set_read_timeout(Some(Duration::from_secs(3)))?;

    let mut buffer = [0u8; 1024];
    for (line, expected) in [
        ("remove 0 b\n", "ACK"),
        ("get_num_of_blocks_in_level 0\n", "2"),
        ("toggle_menu\n", "ACK"),
        ("get_average_max_tilt_angle\n", "0"),
    ] {
        stream.write_all(line.as_bytes())?;
        let read = stream.read(&mut buffer)?;
        assert_eq!(String::from_utf8_lossy(&buffer[..read]), expected);
    }
    drop(stream);
    harness.server.shutdown();
    Ok(())
}

#[test]
fn reset_restores_tower_and_listener_stays_up() -> Result<()> {
    let harness = common::spawn_server();
    let client = &harness.client;

    client.remove(0, BlockColor::Yellow)?;
    client.remove(1, BlockColor::Blue)?;
    assert_eq!(client.reset()?, "ACK");
    for level in 0..3 {
        assert_eq!(client.blocks_in_level(level)?, Some(3));
    }
    assert!(!client.revert_step()?);
    harness.server.shutdown();
    Ok(())
}

#[test]
fn oversized_screenshot_width_does_not_stop_queries() -> Result<()> {
    let harness = common::spawn_server();
    let client = &harness.client;

    assert_eq!(client.send_line("set_screenshot_res 500000000")?, "ACK");
    assert_eq!(client.send_line("set_screenshot_res 4294967295")?, "ACK");
    assert_eq!(client.blocks_in_level(1)?, Some(3));
    assert!(!client.is_fallen()?);
    harness.server.shutdown();
    Ok(())
}
