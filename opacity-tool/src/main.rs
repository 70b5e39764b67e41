use clap::Parser;
use opacity::hex_util;
use opacity::iso7816::apdu::Apdu;
use opacity::iso7816::card::Transceiver;
use opacity::tunnel::{self, TunnelConfig};


/// Application identifier of the PIV card application.
const PIV_AID: [u8; 11] = [0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00];


#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
enum Mode {
    ListReaders,
    Open(OpenOpts),
}

#[derive(Clone, Debug, Eq, Hash, Ord, Parser, PartialEq, PartialOrd)]
struct OpenOpts {
    #[arg(short, long = "reader", default_value = "0")]
    pub reader_index: usize,

    /// Host application identifier (IDH) as 8 hex bytes.
    #[arg(long = "host-id", default_value = "0001020304050607")]
    pub host_id: String,
}


fn main() {
    tracing_subscriber::fmt::init();

    let mode = Mode::parse();

    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .expect("failed to establish PC/SC user context");

    let readers_buf_len = ctx.list_readers_len()
        .expect("failed to obtain length of buffer for PC/SC reader list");
    let mut readers_buf = vec![0u8; readers_buf_len];
    let mut readers = ctx.list_readers(&mut readers_buf)
        .expect("failed to list PC/SC readers");

    let (opts, mut card) = match mode {
        Mode::ListReaders => {
            for (i, reader) in readers.enumerate() {
                println!("{}: {:?}", i, reader);
            }
            return;
        },
        Mode::Open(opts) => {
            let Some(reader) = readers.nth(opts.reader_index) else {
                panic!("no reader at index {}", opts.reader_index)
            };

            match ctx.connect(reader, pcsc::ShareMode::Shared, pcsc::Protocols::ANY) {
                Ok(c) => (opts, c),
                Err(e) => panic!("failed to connect to card: {}", e),
            }
        },
    };

    let host_id_bytes = hex_util::bytes_from_hex(&opts.host_id)
        .expect("failed to parse host ID");
    let host_id: [u8; 8] = host_id_bytes.as_slice().try_into()
        .expect("host ID must be exactly 8 bytes");

    // SELECT the PIV card application
    let select_piv = Apdu {
        cla: 0x00,
        ins: 0xA4, // SELECT
        p1: 0b000_001_00, // select by DF name (application identifier)
        p2: 0b0000_00_00, // return basic metadata, return first or only occurrence
        data: PIV_AID.to_vec(),
        response_length: Some(0),
    };
    let select_response = card.transceive("SELECT PIV", &select_piv)
        .expect("failed to SELECT PIV application");
    if !select_response.trailer.is_success() {
        panic!("obtained response 0x{:04X} when SELECTing PIV application", select_response.trailer.to_word());
    }

    let config = TunnelConfig { host_id };
    match tunnel::open_tunnel(&mut card, &config) {
        Ok(session) => {
            println!("Opacity tunnel established in {} ms", session.metrics.tunnel_creation_ms);
            println!("  signer ID: {}", hex_util::hex_from_bytes(&session.card_signature.id));
            println!("  issuer ID: {}", hex_util::hex_from_bytes(&session.card_signature.issuer_id));
            println!("  GUID:      {}", hex_util::hex_from_bytes(&session.card_signature.guid));
            println!("Card Verifiable Certificate:");
            opacity::hexdump(&session.card_signature.cvc);
            // the session keys are deliberately not printed; hand them to
            // the Secure Messaging layer instead
        },
        Err(e) => {
            let what = match &e {
                tunnel::Error::Transport(_) => "Error communicating with card",
                tunnel::Error::Parse(_)
                | tunnel::Error::PersistentBindingRequested { .. } => "Unexpected response from card",
                tunnel::Error::CryptoInit(_)
                | tunnel::Error::KeyValidation(_)
                | tunnel::Error::Ecdh(_)
                | tunnel::Error::Authentication => "Cryptography error",
            };
            eprintln!("{}: {}", what, e);
            std::process::exit(1);
        },
    }
}
