//! Shared fixtures for the integration tests
//!
//! Two RSA-1024 device keys (slots 0 and 1) and an RSA-2048 authority key,
//! all with e = 65537 and `qi = q^-1 mod p`. The private exponents are here
//! only so tests can check results independently of the CRT path.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::{self, Write};

use num_bigint_dig::BigUint;
use rand::rngs::StdRng;
use rand::SeedableRng;

use ownerguard::codec;
use ownerguard::keystore::{
    owner_key_offset, KEY_RECORD_SIZE, MACHINE_RECORD_OFFSET, MAX_KEYS, NUM_OWNER_KEYS,
    OWNER_KEY_SIZE, REGION_SIZE,
};
use ownerguard::platform::{ByteChannel, Platform};
use ownerguard::{EngineConfig, KeyStore, ProtocolEngine};

pub const TERM: u8 = 0x0D;
pub const START_TIME: u64 = 1_700_000_000;
pub const OWNER_KEY: [u8; OWNER_KEY_SIZE] = *b"owner-secret-#01";
pub const SERIAL: &[u8; 16] = b"SN-0000000000042";
pub const HW_VERSION: &[u8; 16] = b"HW-REV-C\0\0\0\0\0\0\0\0";
pub const PUBLIC_EXPONENT: [u8; 4] = [0x00, 0x01, 0x00, 0x01];
pub const CREATED: [u8; 4] = [0x47, 0x00, 0x00, 0x00];

/// Private-key record field offsets
pub mod field {
    use core::ops::Range;

    pub const PID: Range<usize> = 0..16;
    pub const P: Range<usize> = 16..80;
    pub const Q: Range<usize> = 80..144;
    pub const DP: Range<usize> = 144..208;
    pub const DQ: Range<usize> = 208..272;
    pub const QI: Range<usize> = 272..336;
    pub const N: Range<usize> = 336..464;
    pub const E: Range<usize> = 464..468;
    pub const CREATED: Range<usize> = 468..472;
}

pub struct DeviceKey {
    pub n: &'static str,
    pub p: &'static str,
    pub q: &'static str,
    pub dp: &'static str,
    pub dq: &'static str,
    pub qi: &'static str,
    pub d: &'static str,
}

pub const DEVICE_KEYS: [DeviceKey; 2] = [
    DeviceKey {
        n: DEVICE_KEY_0_N,
        p: DEVICE_KEY_0_P,
        q: DEVICE_KEY_0_Q,
        dp: DEVICE_KEY_0_DP,
        dq: DEVICE_KEY_0_DQ,
        qi: DEVICE_KEY_0_QI,
        d: DEVICE_KEY_0_D,
    },
    DeviceKey {
        n: DEVICE_KEY_1_N,
        p: DEVICE_KEY_1_P,
        q: DEVICE_KEY_1_Q,
        dp: DEVICE_KEY_1_DP,
        dq: DEVICE_KEY_1_DQ,
        qi: DEVICE_KEY_1_QI,
        d: DEVICE_KEY_1_D,
    },
];

pub fn big(hex_str: &str) -> BigUint {
    BigUint::from_bytes_be(&hex::decode(hex_str).unwrap())
}

/// Right-align a big-endian hex value into a fixed-width field
fn put_be(dst: &mut [u8], hex_str: &str) {
    let bytes = hex::decode(hex_str).unwrap();
    assert!(bytes.len() <= dst.len());
    dst.fill(0);
    let start = dst.len() - bytes.len();
    dst[start..].copy_from_slice(&bytes);
}

pub fn pid(slot: usize) -> [u8; 16] {
    let mut pid = *b"PID-key-slot-#00";
    pid[14] = b'0' + (slot / 10) as u8;
    pid[15] = b'0' + (slot % 10) as u8;
    pid
}

/// Builder for a provisioned key region
pub struct RegionBuilder {
    bytes: Vec<u8>,
}

impl RegionBuilder {
    /// Device keys in slots 0 and 1, one owner key in slot 0, the fixture
    /// authority key and a fixed identity
    pub fn new() -> Self {
        let mut bytes = vec![0u8; REGION_SIZE];
        for slot in 0..MAX_KEYS {
            let record = &mut bytes[slot * KEY_RECORD_SIZE..(slot + 1) * KEY_RECORD_SIZE];
            record[field::PID].copy_from_slice(&pid(slot));
        }
        for (slot, key) in DEVICE_KEYS.iter().enumerate() {
            let record = &mut bytes[slot * KEY_RECORD_SIZE..(slot + 1) * KEY_RECORD_SIZE];
            put_be(&mut record[field::P], key.p);
            put_be(&mut record[field::Q], key.q);
            put_be(&mut record[field::DP], key.dp);
            put_be(&mut record[field::DQ], key.dq);
            put_be(&mut record[field::QI], key.qi);
            put_be(&mut record[field::N], key.n);
            record[field::E].copy_from_slice(&PUBLIC_EXPONENT);
            record[field::CREATED].copy_from_slice(&CREATED);
        }

        let machine = MACHINE_RECORD_OFFSET;
        bytes[machine..machine + 16].copy_from_slice(b"GUID-0123456789A");
        bytes[machine + 16..machine + 32].copy_from_slice(SERIAL);
        bytes[machine + 32..machine + 48].copy_from_slice(HW_VERSION);
        let authority = owner_key_offset(NUM_OWNER_KEYS);
        put_be(&mut bytes[authority..authority + 256], AUTHORITY_KEY_N);
        bytes[authority + 256..authority + 260].copy_from_slice(&PUBLIC_EXPONENT);
        for (i, seed) in bytes[authority + 260..REGION_SIZE]
            .chunks_exact_mut(16)
            .enumerate()
        {
            seed.fill(0x30 + i as u8);
        }

        Self { bytes }.owner_key(0, OWNER_KEY)
    }

    pub fn owner_key(mut self, slot: usize, key: [u8; OWNER_KEY_SIZE]) -> Self {
        let at = owner_key_offset(slot);
        self.bytes[at..at + OWNER_KEY_SIZE].copy_from_slice(&key);
        self
    }

    pub fn without_owner_keys(mut self) -> Self {
        let at = owner_key_offset(0);
        self.bytes[at..at + NUM_OWNER_KEYS * OWNER_KEY_SIZE].fill(0);
        self
    }

    /// Flip one bit in a private-key field, simulating a fault in storage
    pub fn corrupt(mut self, slot: usize, field: core::ops::Range<usize>) -> Self {
        let at = slot * KEY_RECORD_SIZE + field.end - 1;
        self.bytes[at] ^= 0x01;
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }

    pub fn store(self) -> KeyStore {
        KeyStore::from_region(&self.build()).unwrap()
    }
}

/// Scriptable board: settable clock and straps, records every hook call
#[derive(Debug, Default)]
pub struct TestPlatform {
    pub now: u64,
    /// Every persistence hook fails
    pub storage_broken: bool,
    pub service_mode: bool,
    pub pending_presence: bool,
    pub erased_slots: Vec<usize>,
    pub key_material_erased: bool,
    pub power_downs: u32,
    pub resets: u32,
    pub alarms: Vec<u32>,
}

impl Platform for TestPlatform {
    fn now_secs(&self) -> u64 {
        self.now
    }

    fn service_mode(&self) -> bool {
        self.service_mode
    }

    fn persist_owner_key_erasure(&mut self, slot: usize) -> anyhow::Result<()> {
        if self.storage_broken {
            anyhow::bail!("flash write failed");
        }
        self.erased_slots.push(slot);
        Ok(())
    }

    fn erase_key_material(&mut self) -> anyhow::Result<()> {
        if self.storage_broken {
            anyhow::bail!("flash erase failed");
        }
        self.key_material_erased = true;
        Ok(())
    }

    fn power_down(&mut self) -> anyhow::Result<()> {
        self.power_downs += 1;
        Ok(())
    }

    fn reset_host(&mut self) -> anyhow::Result<()> {
        self.resets += 1;
        Ok(())
    }

    fn set_alarm(&mut self, at: u32) -> anyhow::Result<()> {
        self.alarms.push(at);
        Ok(())
    }

    fn poll_presence(&mut self) -> bool {
        core::mem::take(&mut self.pending_presence)
    }
}

pub type TestEngine = ProtocolEngine<StdRng, TestPlatform>;

pub fn engine_with(store: KeyStore, config: EngineConfig) -> TestEngine {
    let platform = TestPlatform {
        now: START_TIME,
        ..Default::default()
    };
    ProtocolEngine::new(config, store, StdRng::seed_from_u64(7), platform).unwrap()
}

pub fn engine() -> TestEngine {
    engine_with(RegionBuilder::new().store(), EngineConfig::default())
}

/// One scripted connection: bytes in, replies out, then EOF or a link error
pub struct ScriptedChannel {
    input: VecDeque<u8>,
    drop_at_end: bool,
    pub output: Vec<u8>,
}

impl ScriptedChannel {
    pub fn closing(input: &[u8]) -> Self {
        Self {
            input: input.iter().copied().collect(),
            drop_at_end: false,
            output: Vec::new(),
        }
    }

    pub fn dropping(input: &[u8]) -> Self {
        Self {
            drop_at_end: true,
            ..Self::closing(input)
        }
    }
}

impl Write for ScriptedChannel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ByteChannel for ScriptedChannel {
    fn read_byte(&mut self) -> io::Result<Option<u8>> {
        match self.input.pop_front() {
            Some(b) => Ok(Some(b)),
            None if self.drop_at_end => Err(io::ErrorKind::ConnectionReset.into()),
            None => Ok(None),
        }
    }
}

/// Feed bytes and collect everything the engine wrote back
pub fn exchange(engine: &mut TestEngine, input: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    for &byte in input {
        engine.step(byte, &mut out).unwrap();
    }
    out
}

/// `CHAL`/`CHUP` frame for key `x` and nonce `rn`
pub fn challenge_frame(tag: &[u8; 4], x: u16, rn: &[u8; 16]) -> Vec<u8> {
    let mut frame = tag.to_vec();
    frame.extend_from_slice(codec::encode_wrapped(&x.to_le_bytes()).as_bytes());
    frame.extend_from_slice(codec::encode_wrapped(rn).trim_end().as_bytes());
    frame.push(TERM);
    frame
}

/// Frame with a single base64 payload
pub fn frame(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut frame = tag.to_vec();
    frame.extend_from_slice(codec::encode_wrapped(payload).trim_end().as_bytes());
    frame.push(TERM);
    frame
}

/// Split a reply body into base64 records. A record ends on the first line
/// shorter than the 64-column wrap.
pub fn records(body: &[u8]) -> Vec<Vec<u8>> {
    let text = std::str::from_utf8(body).unwrap();
    let mut records = Vec::new();
    let mut current = String::new();
    for line in text.split_terminator('\n') {
        current.push_str(line);
        if line.len() < 64 {
            records.push(codec::decode(current.as_bytes()).unwrap());
            current.clear();
        }
    }
    assert!(current.is_empty(), "unterminated record");
    records
}

pub const DEVICE_KEY_0_N: &str = concat!(
    "c540a24088d3a75d815d7a596ebc74d5baa797cee7f2a5e9abdd637c21a4f192",
    "f2ae295d1f104792c6e0f06d3cdf711c4f1bd2a9237f4591a7e9d9bc09e2e7e0",
    "0ccdf78ceb6a628a6b62c840c6478e67c06477ac72268403a46273da1ad6d834",
    "25e0c889de4aaac834bca97ec054b9d19c01b4b0d6658853591ffd39295368f7",
);

pub const DEVICE_KEY_0_P: &str = concat!(
    "eac0c22e5d235cab616eb2a9fb09b28d2e778e78671eaa350e8936d8133fee34",
    "eb0e37f4d6290f039dca0bdcdd3a68c50fb88164ccc1492712e2992b24380fb7",
);

pub const DEVICE_KEY_0_Q: &str = concat!(
    "d71afc8de7d26fa73a40761db62081b01e046a29e273c9dc6547cdc012745b61",
    "22786e2450c22d38c847c8ad9ffe8abd6894e4dda7155f465b4ae66f6e4cf0c1",
);

pub const DEVICE_KEY_0_DP: &str = concat!(
    "5f1cd45026aa622c89e0690117d639029cb61202547d8726d209e42fadb4f455",
    "7a7b1b4ed6ca71ebdc2d759afa0365599a61fe031236a9e5ebefe571264e9487",
);

pub const DEVICE_KEY_0_DQ: &str = concat!(
    "d6507cf0a5d8748618f3c0bb398a89abff3c46ca146568e9bdbf1cb011b2fc98",
    "7acfa26d6c490ae55826ad3acffdbc1d9ae53e61d8e6e25626ff29383c9d4c01",
);

pub const DEVICE_KEY_0_QI: &str = concat!(
    "1217c58b1dc604dcd7392b73782d375cfb668457ca5f5c9c47816970d3603a9f",
    "c5743e06473e34535bf44d034e464185178b45524531dd6aed1e2026e008ab6b",
);

pub const DEVICE_KEY_0_D: &str = concat!(
    "7ef70379169965f941f3b1752f5a0eba23d30c5c19e08dfac2ad5603e8840b1a",
    "d32a5765a1411150e0c298ff37577baf051c9b94534cf0b2b8aa45844bb8ca16",
    "c396f60b1799a3b778f1dd8c4a93021ea14cddb8e435a9adf2a52a400251a40b",
    "0f11b569681efd40f05df584e44d54704c431ad8e287a486919c544f6832a401",
);

pub const DEVICE_KEY_1_N: &str = concat!(
    "b9323df2efdfc5bf56bca471340e3ac902ba9cf7aeda3ccf59035a3fec5d349b",
    "9ba0983a3cdf5c9c9a92970e4525839cdd72600a77c7b1cc2cf6df6212c21465",
    "0d20b0090b796db7d20692568e3bbd497e955e840cee0257e55dde19a3d5ed62",
    "0bcd5f1e2a6a071c28f7a0d3e758296cc9231afb213598521aca4e087494d63d",
);

pub const DEVICE_KEY_1_P: &str = concat!(
    "efddc1280c0b7bd98e247ff3b20580d20e70bdc8d1ef318c3c6a28e9f3f55dff",
    "099188a561605df1cb81174e6960635bc8987bd90cb85f1c9603e9444fdcd4c5",
);

pub const DEVICE_KEY_1_Q: &str = concat!(
    "c5a720b5db5fd7288ecbcced6a2f699fd85d164b8416530648d1cc3e2b3510bd",
    "36f054e01c1786322365775928af043faa3153fa04592a108182aaf33d4ac319",
);

pub const DEVICE_KEY_1_DP: &str = concat!(
    "d2933d05293dd3a67430fadb37c7b905af83ae38e484365d449476029d172543",
    "c664ab2f74c322f6288fd5a412c279b793ecb99d1c9ba773f306cffc16986979",
);

pub const DEVICE_KEY_1_DQ: &str = concat!(
    "ace6c094956d47987122130874e538eedda4c0c61aac34c0c09ed69e63c9adf4",
    "f7c4515b22f7e92a9f1039d142e7a73dd2320896238ba4628008c066bbed54b1",
);

pub const DEVICE_KEY_1_QI: &str = concat!(
    "4d4e4ad15c7e2742968a72601df2f1c921b9b797b76e0be10263ce2445d0da9a",
    "cc1afa597c7bc766cbf7b388ef686d775f57770ce1186cbe29534d5bfc9fdae2",
);

pub const DEVICE_KEY_1_D: &str = concat!(
    "95bd97f55c1ab50b769864e5db4f3e1cd58609f1028216f51865eb8d101274bc",
    "f4e2aef337d0ea52fd70558f063dc4e30af2b5d100f488402c83182f763752c0",
    "d84f742dd1a34dd96a282dd53e7361fb4c0fdd5162b52d2c70043b133d5064c0",
    "ad55c9dda6c8c999a769b226027727af997fed92e12a26cca88d142b63542341",
);

pub const AUTHORITY_KEY_N: &str = concat!(
    "9ed863b96b7d2edd3226ac9e69a95592b7332f717f72728b08208afedcb40b22",
    "236af203f74327ca3b3d594d7254d85b7a8d9fef0e6a5969b402a0b3c5bd08f7",
    "ed9b4732621f4fa1e2943b743a58859030d99e52117cba7d2271994bfbf43eca",
    "8f0d4c9c159a8c322b12930d2524ff380e8d210fd2040bfc697e362816041267",
    "33c98ed465d741c85d76d3b2d69ef0f40c26a4db73a6ca7ea4643fb4f1a265e8",
    "82012bbd308f844bd957b4d3e3d30fef24ec0539998c60b7571849522f27ee51",
    "1b259672e0949c908b02a8e94a2ace130b5d7567295f06da9a1304905e43c4e3",
    "187c5a296d6d9b832e850fc76fc03178ac676dd76b531dfbfbbc2a9729ad0007",
);

pub const AUTHORITY_KEY_P: &str = concat!(
    "cf70ddac5389f73c2d5a72a3c88c394f44f4e1360d5c206561f46d8fa6df1dfa",
    "dfe103002585c80b4c6875acf760ec020118315ee01fd7e99cced774c9b77144",
    "980ee76f4d809f3ffaf7b339e076e094a2525b4a9bcc81ecd01e349f89fc9a99",
    "a96e936ec19341f7ccaa69a49255448c5c3c36ab9aab81b7f7d1a77b6be43bd1",
);

pub const AUTHORITY_KEY_Q: &str = concat!(
    "c4076028d8085dc5c0d5a8fac9f6ff530e52b9e3550ccfdec98d0ef85ad0122b",
    "c4d2602e552850569ea055f1194ceb1a6eab80d15475d8b12902225f0910c54b",
    "e6b0e43f1e27de5539eda86773fd98eea2543000f429a4dc4179cfa192fac4b8",
    "6265c1c0b728b1a3e92904319d4dc0dfcfee07467f0532f77749fd9bae78ec57",
);

pub const AUTHORITY_KEY_DP: &str = concat!(
    "12c519a9c01d59bb9e36f2ec92f6ed309902b76616ab615b0b13fcdde4b1879a",
    "edab04847ce0b00b25acc60912913889ade3ac83f32fae6fbafa945042f8504d",
    "6e9cdaa01d9927cfb83bb581e5279c86967171453cf7b241e54af664012e5426",
    "d747e41b3f74bda158698b09931c1809c346c7839b892d41a230dc40b4b08021",
);

pub const AUTHORITY_KEY_DQ: &str = concat!(
    "40f1709a17782e18e5d9e331b2d7719f428f85a61af733a6cb7f4006678fa775",
    "78af79cddfc88b552718576098d132d27ef7b2a5a725a3b48db17751a4df397d",
    "fbdf7ebeaa6eeae9b1575b036b1a09208606fe2052c3b92a7f46abd30baea89d",
    "ad7ba8c4ffe92b70f23df475bb7796fe8f147cb48e405ab24182f1d231eb3de1",
);

pub const AUTHORITY_KEY_QI: &str = concat!(
    "064dee9441bd4893d10fd13ac846d5b753e913508ddff4922029c9b40f944d5e",
    "d4f87f6f2da44e38c49ad7820994eabc2a87bfbbbc1e32601d33b9e5acf10be7",
    "669317879332198536b2bda15ace1f239a3cd0e061b9a8546ea7cebdf2de45cd",
    "11af48ba6df35c25c9aad9812c5e3445dcd987130b5248d7e2331775dab5b80b",
);

pub const AUTHORITY_KEY_D: &str = concat!(
    "43f95bab8438fcae0181154b70f1dac1bf0df35681706b5dddab776f9ae89cff",
    "0de2fd0fff66c8873d1482bba69a723fab5121c8be057a9fc63d7da19093d55b",
    "ab5d50795a0e0618c38a256b1670bd2f3808583ccc68f0b10de548f1802f4413",
    "9065e38bc39ef031a3c6fe1098fd9d0dd30447caaa57bafd57f37f9f65d4763e",
    "f0fcfb494d1923adc2fea35560d3efeb60ce693198093cf2daba47455aa55c32",
    "cace376e029d257de4d1f5f0679bbd164619ac770fb29528946eccb0c93cd8b8",
    "5ef51c71378bb7b25c668ba4a89c4ed17bfad871d9134d1793acf733f3408b12",
    "28355a73d06799ef6ef1acd83d547e7e16fe98196cf6b052e6b6e68a27834661",
);
