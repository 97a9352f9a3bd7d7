#[macro_use]
extern crate afl;
use musubi_transport::{
    Authority, DeviceName, EncodedMessage, Identity, InMemoryTransportData, LocalAuthority,
    MessageCodec,
};

fn get_codec() -> MessageCodec<LocalAuthority, InMemoryTransportData> {
    // Fixed seed so crashes reproduce
    let authority = LocalAuthority::from_seed([7u8; 32]);
    let victim = Identity::from_principal(Authority::Email, "victim@example.com");

    let mut provider = InMemoryTransportData::new(DeviceName::from([1u8; 8]), None);
    provider.set_signature_time(victim, 1);
    provider.set_encryption_time(victim, 1);
    provider.add_owned_identity(victim);
    provider.add_signature_key(
        authority
            .extract_signature_key(&victim.at(1))
            .expect("Setup failed"),
    );
    provider.add_encryption_key(
        authority
            .extract_encryption_key(&victim.at(1))
            .expect("Setup failed"),
    );

    MessageCodec::new(authority, provider, None)
}

fn main() {
    let mut codec = get_codec();

    fuzz!(|data: &[u8]| {
        let _ = codec.decode(&mut EncodedMessage::inbound(data.to_vec()));
    });
}
