//! End-to-end tests of `EipClient` against a scripted target.

mod common;

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;

use common::{forward_close_ok, FakeDevice, TARGET_O_TO_T};
use enip_protocol::cip::message::service;
use enip_protocol::cip::MessageRouterRequest;
use enip_protocol::client::{ClientConfig, EipClient};
use enip_protocol::encapsulation::{cpf, Command};
use enip_protocol::Error;

fn get_attribute(attribute: u8) -> MessageRouterRequest {
    MessageRouterRequest::new(
        service::GET_ATTRIBUTE_SINGLE,
        vec![0x20, 0x01, 0x24, 0x01, 0x30, attribute],
        vec![],
    )
}

fn attribute_reply(value: u8) -> Vec<u8> {
    vec![service::GET_ATTRIBUTE_SINGLE | service::REPLY, 0, 0, 0, value]
}

#[tokio::test]
async fn test_unconnected_request_registers_first() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        device.accept_registration().await;
        let packet = device.expect(Command::SendRRData).await;
        assert_eq!(packet.header.session_handle, common::SESSION);
        assert_eq!(hex::encode(packet.cip()), "0e03200124013007");
        device.reply_unconnected(&packet, &attribute_reply(0x2A)).await;
    };
    let request = get_attribute(7);
    let (reply, ()) = tokio::join!(client.call(&request, false), device_script);

    assert_eq!(reply.unwrap().data.as_ref(), &[0x2A]);
}

#[tokio::test]
async fn test_connected_replies_reach_their_callers() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());
    let first = client.clone();
    let second = client.clone();

    let device_script = async {
        let t_to_o = device.accept_connection().await;
        let mut requests = Vec::new();
        for _ in 0..2 {
            let packet = device.expect(Command::SendUnitData).await;
            let packet = cpf::decode(packet.body).unwrap();
            assert_eq!(packet.connection_id, Some(TARGET_O_TO_T));
            requests.push(packet.data);
        }
        // answer in reverse order, echoing the attribute id
        for request in requests.iter().rev() {
            let sequence = u16::from_le_bytes([request[0], request[1]]);
            let attribute = request[request.len() - 1];
            device
                .reply_connected(t_to_o, sequence, &attribute_reply(attribute * 10))
                .await;
        }
    };
    let request_a = get_attribute(1);
    let request_b = get_attribute(2);
    let (a, b, ()) = tokio::join!(
        first.call(&request_a, true),
        second.call(&request_b, true),
        device_script
    );

    assert_eq!(a.unwrap().data.as_ref(), &[10]);
    assert_eq!(b.unwrap().data.as_ref(), &[20]);
}

#[tokio::test]
async fn test_device_status_fails_only_that_request() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        device.accept_registration().await;
        let packet = device.expect(Command::SendRRData).await;
        // path destination unknown
        device
            .reply_unconnected(&packet, &[service::GET_ATTRIBUTE_SINGLE | service::REPLY, 0, 0x05, 0])
            .await;
        let packet = device.expect(Command::SendRRData).await;
        device.reply_unconnected(&packet, &attribute_reply(1)).await;
    };
    let requests = async {
        let failed = client.call(&get_attribute(9), false).await;
        let ok = client.call(&get_attribute(1), false).await;
        (failed, ok)
    };
    let ((failed, ok), ()) = tokio::join!(requests, device_script);

    assert!(matches!(failed, Err(Error::Cip { status: 0x05, .. })));
    assert!(ok.is_ok());
}

#[tokio::test]
async fn test_administrative_commands() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        device.accept_registration().await;
        let nop = device.expect(Command::Nop).await;
        assert_eq!(nop.body.as_ref(), b"ping");
        let identity = device.expect(Command::ListIdentity).await;
        device.reply(&identity, 0, &[0x01, 0x00, 0x0C, 0x00]).await;
    };
    let requests = async {
        client.nop(Bytes::from_static(b"ping")).await.unwrap();
        client.list_identity().await
    };
    let (identity, ()) = tokio::join!(requests, device_script);

    assert_eq!(identity.unwrap().as_ref(), &[0x01, 0x00, 0x0C, 0x00]);
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        let packet = device.expect(Command::RegisterSession).await;
        device.reply(&packet, 0x69, &[]).await;
        // the client tears the stream down
        assert!(device.next().await.is_none());
    };
    let (result, ()) = tokio::join!(client.register(), device_script);

    assert!(matches!(result, Err(Error::Encapsulation { status: 0x69, .. })));
    assert!(matches!(
        client.send_unconnected(get_attribute(1).encode()).await,
        Err(Error::Closed)
    ));
}

#[tokio::test]
async fn test_peer_hangup_rejects_pending() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async move {
        device.accept_registration().await;
        device.expect(Command::SendRRData).await;
        drop(device);
    };
    let request = get_attribute(3);
    let (result, ()) = tokio::join!(client.call(&request, false), device_script);

    assert!(matches!(result, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_unsolicited_frames_reach_the_application() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, mut unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        device.accept_registration().await;
        let packet = enip_protocol::encapsulation::encode(
            Command::SendRRData,
            common::SESSION,
            Default::default(),
            &cpf::encode_unconnected(&[0xCC, 0x00, 0x00, 0x00]),
        );
        device.write(&packet).await;
    };
    let (registered, ()) = tokio::join!(client.register(), device_script);
    registered.unwrap();

    let frame = unsolicited.recv().await.unwrap();
    assert_eq!(frame.data.as_ref(), &[0xCC, 0x00, 0x00, 0x00]);
}

#[tokio::test]
async fn test_close_runs_forward_close_then_unregister() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let device_script = async {
        device.accept_connection().await;
        let packet = device.expect(Command::SendRRData).await;
        let request = packet.cip();
        assert_eq!(request[0], service::FORWARD_CLOSE);
        device
            .reply_unconnected(&packet, &forward_close_ok(&request))
            .await;
        device.expect(Command::UnregisterSession).await;
        assert!(device.next().await.is_none());
    };
    let lifecycle = async {
        client.open().await.unwrap();
        client.close().await
    };
    let (closed, ()) = tokio::join!(lifecycle, device_script);

    closed.unwrap();
    assert!(matches!(client.open().await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_hangup_during_close_fails_close() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let (opened, _) = tokio::join!(client.open(), device.accept_connection());
    opened.unwrap();

    let device_script = async move {
        let packet = device.expect(Command::SendRRData).await;
        assert_eq!(packet.cip()[0], service::FORWARD_CLOSE);
        drop(device);
    };
    let (closed, ()) = tokio::join!(client.close(), device_script);

    assert!(matches!(
        closed,
        Err(Error::ConnectionClosed | Error::Transport(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_settles_against_silent_target() {
    let (stream, mut device) = FakeDevice::pair();
    let (client, _unsolicited) = EipClient::spawn(stream, &ClientConfig::default());

    let (opened, _) = tokio::join!(client.open(), device.accept_connection());
    opened.unwrap();

    let started = Instant::now();
    let (disconnected, forward_close) =
        tokio::join!(client.disconnect(), device.expect(Command::SendRRData));
    let elapsed = started.elapsed();

    assert_eq!(forward_close.cip()[0], service::FORWARD_CLOSE);
    disconnected.unwrap();
    assert!(elapsed >= Duration::from_secs(5), "settled after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(6), "settled after {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_forward_open_timeout_tears_down() {
    let (stream, mut device) = FakeDevice::pair();
    let config = ClientConfig::builder()
        .connect_timeout(Duration::from_secs(2))
        .build();
    let (client, _unsolicited) = EipClient::spawn(stream, &config);

    let device_script = async {
        device.accept_registration().await;
        device.expect(Command::SendRRData).await;
        assert!(device.next().await.is_none());
    };
    let (opened, ()) = tokio::join!(client.open(), device_script);

    assert!(matches!(opened, Err(Error::Timeout(t)) if t == Duration::from_secs(2)));
}
