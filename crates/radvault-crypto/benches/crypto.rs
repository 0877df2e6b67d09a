use radvault_crypto::{apply_at, derive_kek, ChaChaState};
use secrecy::SecretString;

fn make_data(size: usize) -> Vec<u8> {
    (0..size)
        .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
        .collect()
}

#[divan::bench(args = [16, 128, 4096])]
fn bench_apply_at(bencher: divan::Bencher, size: usize) {
    let key = [0x5Au8; 32];
    bencher
        .counter(divan::counter::BytesCount::new(size))
        .with_inputs(|| make_data(size))
        .bench_values(|mut data| {
            apply_at(divan::black_box(&key), divan::black_box(0x1013), &mut data);
            data
        });
}

#[divan::bench]
fn bench_block() -> [u8; 64] {
    let state = ChaChaState::new(&[1u8; 32], &[2u8; 12], 3);
    *divan::black_box(&state).block()
}

#[divan::bench(args = [256, 8192])]
fn bench_derive_kek(bencher: divan::Bencher, iterations: u32) {
    let passcode = SecretString::from("123456");
    let hardware_id = [0xABu8; 16];
    bencher.bench(|| {
        derive_kek(
            divan::black_box(&passcode),
            divan::black_box(&hardware_id),
            iterations,
            || {},
        )
    });
}

fn main() {
    divan::main();
}
