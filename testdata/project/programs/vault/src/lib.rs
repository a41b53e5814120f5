pub struct Vault {
    pub authority: [u8; 32],
    pub lamports: u64,
}

impl Vault {
    pub fn withdraw(&mut self, amount: u64) -> u64 {
        self.lamports = self.lamports.checked_sub(amount).unwrap();
        self.lamports
    }

    pub fn shares(&self, price: u128) -> u32 {
        (self.lamports as u128 / price) as u32
    }
}
