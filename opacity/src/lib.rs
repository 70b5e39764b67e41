pub mod card_signature;
pub mod crypt;
pub mod der_util;
pub mod hex_util;
pub mod iso7816;
pub mod kdf;
pub mod tunnel;


pub fn hexdump(buf: &[u8]) {
    for (row, chunk) in buf.chunks(16).enumerate() {
        print!("{:08X}  ", row * 16);

        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => print!(" {:02X}", b),
                None => print!("   "),
            }
        }

        print!(" |");
        for b in chunk {
            if (b' '..=b'~').contains(b) {
                print!("{}", char::from(*b));
            } else {
                print!(".");
            }
        }
        println!("|");
    }
}
