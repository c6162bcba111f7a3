use serenity::model::id::{ChannelId, UserId};
use tracing::info;

/// Who is invoking a player command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: UserId,
    /// Guild administrators bypass every DJ check.
    pub privileged: bool,
    /// Voice channel the caller is connected to, if any.
    pub voice_channel: Option<ChannelId>,
}

impl Caller {
    pub fn new(user_id: UserId, privileged: bool) -> Self {
        Self {
            user_id,
            privileged,
            voice_channel: None,
        }
    }

    pub fn in_voice(mut self, channel: Option<ChannelId>) -> Self {
        self.voice_channel = channel;
        self
    }
}

/// Member proposed as the new DJ.
#[derive(Debug, Clone, Copy)]
pub struct SwapTarget {
    pub user_id: UserId,
    pub is_bot: bool,
    /// Voice channel the member is connected to, if any.
    pub voice_channel: Option<ChannelId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Denied {
    #[error("Solo los administradores y el DJ pueden usar este comando.")]
    NotDj,
    #[error("No puedes pasarle el DJ a un bot.")]
    TargetIsBot,
    #[error("Esa persona ya es el DJ.")]
    AlreadyDj,
    #[error("Esa persona no está en un canal de voz.")]
    TargetNotInVoice,
    #[error("Esa persona no está en mi mismo canal de voz.")]
    TargetInOtherChannel,
}

/// DJ identity and lock flag of one session.
///
/// Two checks gate the player commands:
///
/// - [`check_lock`](DjGate::check_lock) for queue and playback commands:
///   open to everyone unless the session is locked *and* has a DJ.
/// - [`check_dj`](DjGate::check_dj) for DJ management (lock, swap): once a DJ
///   exists only they or an administrator pass, locked or not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DjGate {
    dj: Option<UserId>,
    locked: bool,
}

impl DjGate {
    pub fn new(dj: Option<UserId>) -> Self {
        Self { dj, locked: false }
    }

    pub fn dj(&self) -> Option<UserId> {
        self.dj
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn check_lock(&self, caller: &Caller) -> Result<(), Denied> {
        if !self.locked || self.dj.is_none() {
            return Ok(());
        }
        self.check_identity(caller)
    }

    pub fn check_dj(&self, caller: &Caller) -> Result<(), Denied> {
        if self.dj.is_none() {
            return Ok(());
        }
        self.check_identity(caller)
    }

    /// Locks or unlocks the session and returns the new lock state.
    ///
    /// Locking a session without a DJ makes the caller the DJ, otherwise the
    /// lock would have no one to let through.
    pub fn toggle_lock(&mut self, caller: &Caller) -> Result<bool, Denied> {
        self.check_dj(caller)?;

        if self.locked {
            self.locked = false;
        } else {
            self.dj.get_or_insert(caller.user_id);
            self.locked = true;
        }

        info!(
            "🔒 Sesión {} por {}",
            if self.locked { "bloqueada" } else { "desbloqueada" },
            caller.user_id
        );
        Ok(self.locked)
    }

    /// Hands the DJ role to `target`, who must be a human in `session_channel`.
    pub fn swap(
        &mut self,
        caller: &Caller,
        target: &SwapTarget,
        session_channel: ChannelId,
    ) -> Result<(), Denied> {
        self.check_dj(caller)?;

        if target.is_bot {
            return Err(Denied::TargetIsBot);
        }
        if self.dj == Some(target.user_id) {
            return Err(Denied::AlreadyDj);
        }
        match target.voice_channel {
            None => return Err(Denied::TargetNotInVoice),
            Some(channel) if channel != session_channel => {
                return Err(Denied::TargetInOtherChannel)
            }
            Some(_) => {}
        }

        self.dj = Some(target.user_id);
        info!("🎧 Nuevo DJ: {}", target.user_id);
        Ok(())
    }

    /// Clears the DJ if `user_id` held it. The role is not handed to anyone.
    pub fn member_left(&mut self, user_id: UserId) -> bool {
        if self.dj == Some(user_id) {
            self.dj = None;
            info!("🚪 El DJ {} salió del canal de voz", user_id);
            true
        } else {
            false
        }
    }

    fn check_identity(&self, caller: &Caller) -> Result<(), Denied> {
        if caller.privileged || self.dj == Some(caller.user_id) {
            Ok(())
        } else {
            Err(Denied::NotDj)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> ChannelId {
        ChannelId::new(500)
    }

    fn user(id: u64) -> Caller {
        Caller::new(UserId::new(id), false)
    }

    fn admin(id: u64) -> Caller {
        Caller::new(UserId::new(id), true)
    }

    fn locked_by(dj: u64) -> DjGate {
        let mut gate = DjGate::new(Some(UserId::new(dj)));
        gate.toggle_lock(&user(dj)).unwrap();
        gate
    }

    fn target(id: u64, channel: Option<ChannelId>) -> SwapTarget {
        SwapTarget {
            user_id: UserId::new(id),
            is_bot: false,
            voice_channel: channel,
        }
    }

    #[test]
    fn unlocked_session_lets_everyone_through() {
        let gate = DjGate::new(Some(UserId::new(1)));
        assert_eq!(gate.check_lock(&user(2)), Ok(()));
    }

    #[test]
    fn locked_session_only_admits_dj_and_admins() {
        let gate = locked_by(1);

        assert_eq!(gate.check_lock(&user(1)), Ok(()));
        assert_eq!(gate.check_lock(&admin(9)), Ok(()));
        assert_eq!(gate.check_lock(&user(2)), Err(Denied::NotDj));
    }

    #[test]
    fn lock_without_dj_is_open() {
        let mut gate = locked_by(1);
        gate.member_left(UserId::new(1));

        assert!(gate.is_locked());
        assert_eq!(gate.check_lock(&user(2)), Ok(()));
    }

    #[test]
    fn dj_check_ignores_the_lock() {
        let gate = DjGate::new(Some(UserId::new(1)));

        assert_eq!(gate.check_dj(&user(2)), Err(Denied::NotDj));
        assert_eq!(DjGate::new(None).check_dj(&user(2)), Ok(()));
    }

    #[test]
    fn locking_without_dj_claims_the_role() {
        let mut gate = DjGate::new(None);

        assert_eq!(gate.toggle_lock(&user(3)), Ok(true));
        assert_eq!(gate.dj(), Some(UserId::new(3)));
        assert_eq!(gate.toggle_lock(&user(4)), Err(Denied::NotDj));
        assert_eq!(gate.toggle_lock(&user(3)), Ok(false));
    }

    #[test]
    fn swap_validates_the_target() {
        let mut gate = DjGate::new(Some(UserId::new(1)));
        let dj = user(1);

        let bot = SwapTarget {
            is_bot: true,
            ..target(2, Some(voice()))
        };
        assert_eq!(gate.swap(&dj, &bot, voice()), Err(Denied::TargetIsBot));
        assert_eq!(gate.swap(&dj, &target(1, Some(voice())), voice()), Err(Denied::AlreadyDj));
        assert_eq!(gate.swap(&dj, &target(2, None), voice()), Err(Denied::TargetNotInVoice));
        assert_eq!(
            gate.swap(&dj, &target(2, Some(ChannelId::new(7))), voice()),
            Err(Denied::TargetInOtherChannel)
        );
        assert_eq!(gate.swap(&user(5), &target(2, Some(voice())), voice()), Err(Denied::NotDj));

        assert_eq!(gate.swap(&dj, &target(2, Some(voice())), voice()), Ok(()));
        assert_eq!(gate.dj(), Some(UserId::new(2)));
    }

    #[test]
    fn leaving_clears_only_the_dj() {
        let mut gate = DjGate::new(Some(UserId::new(1)));

        assert!(!gate.member_left(UserId::new(2)));
        assert!(gate.member_left(UserId::new(1)));
        assert_eq!(gate.dj(), None);
    }
}
