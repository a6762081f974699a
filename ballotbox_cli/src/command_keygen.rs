use ballotbox::{BallotCipher, ENCRYPTION_KEY_VAR};

pub fn command_keygen() {
    let key = hex::encode(BallotCipher::generate_key());
    println!("{}={}", ENCRYPTION_KEY_VAR, key);
}
