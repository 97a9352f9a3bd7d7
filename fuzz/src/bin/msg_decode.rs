#[macro_use]
extern crate afl;
use musubi_transport::{Message, ObjFormat};

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = Message::from_bytes(data);
        let _ = ObjFormat::from_bytes(data);
    });
}
