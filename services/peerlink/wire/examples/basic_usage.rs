//! Basic usage example for the peerlink wire protocol.

use bytes::BytesMut;
use peerlink_wire::{FrameCodec, FrameDecoder, Message, MessageCodec, DEFAULT_MAX_FRAME_SIZE};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== peerlink Wire Protocol Example ===\n");

    // 1. Encode a text message into one frame
    println!("1. Encoding a text message...");
    let message = Message::text("Hello, peer!");
    let frame_bytes = message.encode(DEFAULT_MAX_FRAME_SIZE)?;
    println!("   Encoded frame size: {} bytes", frame_bytes.len());

    // 2. Decode it incrementally, one byte at a time
    println!("\n2. Decoding byte by byte...");
    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::new();
    for (i, byte) in frame_bytes.iter().enumerate() {
        buf.extend_from_slice(&[*byte]);
        if let Some(decoded) = decoder.decode(&mut buf)? {
            println!("   Complete after {} bytes: {:?}", i + 1, decoded.as_text());
        }
    }

    // 3. Stream messages through the async codec
    println!("\n3. Streaming through an in-memory pipe...");
    let (mut client, mut server) = tokio::io::duplex(256);
    let mut tx = FrameCodec::new();
    let mut rx = FrameCodec::new();

    tx.encode_and_send(&mut client, &Message::text("first")).await?;
    tx.encode_and_send(&mut client, &Message::binary(vec![0xde, 0xad, 0xbe, 0xef])).await?;
    drop(client);

    loop {
        match rx.decode_next(&mut server).await {
            Ok(message) => println!("   Received {:?} ({} bytes)", message.flags, message.payload.len()),
            Err(e) => {
                println!("   Stream ended: {}", e);
                break;
            }
        }
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
