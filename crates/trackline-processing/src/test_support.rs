//! Builders for synthetic fragmented MP4 files.

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = ((8 + body.len()) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, body: &[u8]) -> Vec<u8> {
    let mut full = (((version as u32) << 24) | (flags & 0x00FF_FFFF)).to_be_bytes().to_vec();
    full.extend_from_slice(body);
    make_box(fourcc, &full)
}

#[derive(Debug, Clone, Copy)]
pub struct FragmentSpec {
    pub samples: u32,
    pub sample_duration: u32,
    pub payload_len: usize,
}

impl Default for FragmentSpec {
    fn default() -> Self {
        Self {
            samples: 645,
            sample_duration: 1024,
            payload_len: 256,
        }
    }
}

fn init_segment(timescale: u32) -> Vec<u8> {
    let mut out = make_box(b"ftyp", b"iso6\0\0\0\0iso6mp41");

    let mut mdhd = Vec::new();
    mdhd.extend_from_slice(&0u32.to_be_bytes()); // creation
    mdhd.extend_from_slice(&0u32.to_be_bytes()); // modification
    mdhd.extend_from_slice(&timescale.to_be_bytes());
    mdhd.extend_from_slice(&0u32.to_be_bytes()); // duration
    mdhd.extend_from_slice(&[0x55, 0xc4, 0, 0]);
    let mdia = make_box(b"mdia", &make_full_box(b"mdhd", 0, 0, &mdhd));
    let trak = make_box(b"trak", &mdia);

    let mut trex = Vec::new();
    trex.extend_from_slice(&1u32.to_be_bytes());
    trex.extend_from_slice(&1u32.to_be_bytes());
    trex.extend_from_slice(&0u32.to_be_bytes());
    trex.extend_from_slice(&0u32.to_be_bytes());
    trex.extend_from_slice(&0u32.to_be_bytes());
    let mvex = make_box(b"mvex", &make_full_box(b"trex", 0, 0, &trex));

    let mut moov = trak;
    moov.extend(mvex);
    out.extend(make_box(b"moov", &moov));
    out
}

fn fragment(sequence: u32, decode_time: u64, spec: &FragmentSpec) -> Vec<u8> {
    let mfhd = make_full_box(b"mfhd", 0, 0, &sequence.to_be_bytes());

    // default-base-is-moof
    let tfhd = make_full_box(b"tfhd", 0, 0x02_0000, &1u32.to_be_bytes());
    let tfdt = make_full_box(b"tfdt", 1, 0, &decode_time.to_be_bytes());

    let mut trun_body = spec.samples.to_be_bytes().to_vec();
    for _ in 0..spec.samples {
        trun_body.extend_from_slice(&spec.sample_duration.to_be_bytes());
    }
    let trun = make_full_box(b"trun", 0, 0x100, &trun_body);

    let mut traf = tfhd;
    traf.extend(tfdt);
    traf.extend(trun);

    let mut moof = mfhd;
    moof.extend(make_box(b"traf", &traf));

    let mut out = make_box(b"moof", &moof);
    out.extend(make_box(b"mdat", &vec![0xAAu8; spec.payload_len]));
    out
}

/// An init segment followed by one `moof`+`mdat` pair per entry of `fragments`.
pub fn fragmented_mp4(timescale: u32, fragments: &[FragmentSpec]) -> Vec<u8> {
    let mut out = init_segment(timescale);
    let mut decode_time = 0u64;
    for (i, spec) in fragments.iter().enumerate() {
        out.extend(fragment(i as u32 + 1, decode_time, spec));
        decode_time += spec.samples as u64 * spec.sample_duration as u64;
    }
    out
}
