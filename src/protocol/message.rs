use super::{CodecError, PeerId};

/// Largest datagram any reader in this crate will accept.
pub const MAX_DATAGRAM: usize = 64 * 1024;

/// Wire layout (little-endian integers, one datagram per message):
/// - Invite:    [1][inviter_id u32][group_size u32]
/// - Accept:    [2][from_id u32][group_size u32][count u32][count x member u32]
/// - Reject:    [3][leader_id u32]
/// - Change:    [4][new_leader_id u32]
/// - Heartbeat: [5]
/// - Ok:        [6][name_len u16][name bytes]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    Invite = 1,
    Accept = 2,
    Reject = 3,
    Change = 4,
    Heartbeat = 5,
    Ok = 6,
}

impl TryFrom<u8> for Tag {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Tag::Invite),
            2 => Ok(Tag::Accept),
            3 => Ok(Tag::Reject),
            4 => Ok(Tag::Change),
            5 => Ok(Tag::Heartbeat),
            6 => Ok(Tag::Ok),
            other => Err(CodecError::UnknownTag(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// "Join my group": sent by a node leading a group of `group_size` members.
    Invite { inviter_id: PeerId, group_size: u32 },
    /// "I accept you as leader; here is the group I bring along."
    Accept {
        from_id: PeerId,
        group_size: u32,
        members: Vec<PeerId>,
    },
    /// "I decline; my current leader is `leader_id`" (0 when unknown).
    Reject { leader_id: PeerId },
    /// Coordinator tells its members that leadership moved.
    Change { new_leader_id: PeerId },
    Heartbeat,
    /// Liveness reply carrying the responder's logical name.
    Ok { name: String },
}

const INVITE_LEN: usize = 1 + 4 + 4;
const ACCEPT_HEADER_LEN: usize = 1 + 4 + 4 + 4;
const ID_MSG_LEN: usize = 1 + 4;
const HEARTBEAT_LEN: usize = 1;
const OK_HEADER_LEN: usize = 1 + 2;

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn get_u16(buf: &[u8], at: usize) -> u16 {
    let mut b = [0; 2];
    b.copy_from_slice(&buf[at..at + 2]);
    u16::from_le_bytes(b)
}

fn expect_len(tag: Tag, buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() != expected {
        return Err(CodecError::Length {
            tag: tag as u8,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

fn expect_at_least(tag: Tag, buf: &[u8], expected: usize) -> Result<(), CodecError> {
    if buf.len() < expected {
        return Err(CodecError::Length {
            tag: tag as u8,
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

impl Message {
    pub fn tag(&self) -> Tag {
        match self {
            Message::Invite { .. } => Tag::Invite,
            Message::Accept { .. } => Tag::Accept,
            Message::Reject { .. } => Tag::Reject,
            Message::Change { .. } => Tag::Change,
            Message::Heartbeat => Tag::Heartbeat,
            Message::Ok { .. } => Tag::Ok,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.tag() as u8);

        match self {
            Message::Invite {
                inviter_id,
                group_size,
            } => {
                put_u32(&mut buf, *inviter_id);
                put_u32(&mut buf, *group_size);
            }
            Message::Accept {
                from_id,
                group_size,
                members,
            } => {
                put_u32(&mut buf, *from_id);
                put_u32(&mut buf, *group_size);
                put_u32(&mut buf, members.len() as u32);
                for member in members {
                    put_u32(&mut buf, *member);
                }
            }
            Message::Reject { leader_id } => put_u32(&mut buf, *leader_id),
            Message::Change { new_leader_id } => put_u32(&mut buf, *new_leader_id),
            Message::Heartbeat => {}
            Message::Ok { name } => {
                let len = u16::try_from(name.len())
                    .map_err(|_| CodecError::NameTooLong(name.len()))?;
                buf.extend_from_slice(&len.to_le_bytes());
                buf.extend_from_slice(name.as_bytes());
            }
        }

        Ok(buf)
    }

    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let first = *buf.first().ok_or(CodecError::Empty)?;
        let tag = Tag::try_from(first)?;

        match tag {
            Tag::Invite => {
                expect_len(tag, buf, INVITE_LEN)?;
                Ok(Message::Invite {
                    inviter_id: get_u32(buf, 1),
                    group_size: get_u32(buf, 5),
                })
            }
            Tag::Accept => {
                expect_at_least(tag, buf, ACCEPT_HEADER_LEN)?;
                let declared = get_u32(buf, 9);
                let payload = buf.len() - ACCEPT_HEADER_LEN;
                if payload % 4 != 0 || (payload / 4) as u64 != u64::from(declared) {
                    return Err(CodecError::MemberCount {
                        declared,
                        actual_bytes: payload,
                    });
                }
                let members = (0..declared as usize)
                    .map(|i| get_u32(buf, ACCEPT_HEADER_LEN + i * 4))
                    .collect();
                Ok(Message::Accept {
                    from_id: get_u32(buf, 1),
                    group_size: get_u32(buf, 5),
                    members,
                })
            }
            Tag::Reject => {
                expect_len(tag, buf, ID_MSG_LEN)?;
                Ok(Message::Reject {
                    leader_id: get_u32(buf, 1),
                })
            }
            Tag::Change => {
                expect_len(tag, buf, ID_MSG_LEN)?;
                Ok(Message::Change {
                    new_leader_id: get_u32(buf, 1),
                })
            }
            Tag::Heartbeat => {
                expect_len(tag, buf, HEARTBEAT_LEN)?;
                Ok(Message::Heartbeat)
            }
            Tag::Ok => {
                expect_at_least(tag, buf, OK_HEADER_LEN)?;
                let name_len = get_u16(buf, 1) as usize;
                expect_len(tag, buf, OK_HEADER_LEN + name_len)?;
                let name = std::str::from_utf8(&buf[OK_HEADER_LEN..])
                    .map_err(|_| CodecError::InvalidName)?;
                Ok(Message::Ok {
                    name: name.to_string(),
                })
            }
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Message::Invite { .. } => INVITE_LEN,
            Message::Accept { members, .. } => ACCEPT_HEADER_LEN + members.len() * 4,
            Message::Reject { .. } | Message::Change { .. } => ID_MSG_LEN,
            Message::Heartbeat => HEARTBEAT_LEN,
            Message::Ok { name } => OK_HEADER_LEN + name.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let bytes = msg.encode().expect("encode");
        assert_eq!(bytes.len(), msg.encoded_len());
        assert_eq!(Message::decode(&bytes).expect("decode"), msg);
    }

    #[test]
    fn every_message_type_roundtrips() {
        roundtrip(Message::Invite {
            inviter_id: 7,
            group_size: 3,
        });
        roundtrip(Message::Accept {
            from_id: 2,
            group_size: 2,
            members: vec![4, 9],
        });
        roundtrip(Message::Accept {
            from_id: 2,
            group_size: 0,
            members: vec![],
        });
        roundtrip(Message::Reject { leader_id: 0 });
        roundtrip(Message::Change { new_leader_id: 5 });
        roundtrip(Message::Heartbeat);
        roundtrip(Message::Ok {
            name: "filter_columns_1".to_string(),
        });
    }

    #[test]
    fn invite_layout_is_tag_then_little_endian_fields() {
        let bytes = Message::Invite {
            inviter_id: 0x0102_0304,
            group_size: 1,
        }
        .encode()
        .unwrap();
        assert_eq!(bytes, vec![1, 4, 3, 2, 1, 1, 0, 0, 0]);
    }

    #[test]
    fn empty_buffer_is_rejected() {
        assert_eq!(Message::decode(&[]), Err(CodecError::Empty));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert_eq!(Message::decode(&[0]), Err(CodecError::UnknownTag(0)));
        assert_eq!(Message::decode(&[42, 1, 2]), Err(CodecError::UnknownTag(42)));
    }

    #[test]
    fn fixed_size_messages_reject_wrong_lengths() {
        let reject = Message::Reject { leader_id: 3 }.encode().unwrap();
        let mut long = reject.clone();
        long.push(0);

        assert!(matches!(
            Message::decode(&reject[..4]),
            Err(CodecError::Length { tag: 3, expected: 5, actual: 4 })
        ));
        assert!(matches!(
            Message::decode(&long),
            Err(CodecError::Length { tag: 3, expected: 5, actual: 6 })
        ));
        assert!(matches!(
            Message::decode(&[5, 0]),
            Err(CodecError::Length { tag: 5, .. })
        ));
    }

    #[test]
    fn accept_with_inconsistent_member_count_is_rejected() {
        let mut bytes = Message::Accept {
            from_id: 1,
            group_size: 2,
            members: vec![2, 3],
        }
        .encode()
        .unwrap();

        // Declared count says 2 but one member is missing.
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::MemberCount { declared: 2, actual_bytes: 4 })
        ));

        // Trailing partial member.
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            Message::decode(&bytes),
            Err(CodecError::MemberCount { .. })
        ));
    }

    #[test]
    fn ok_with_invalid_utf8_name_is_rejected() {
        let bytes = vec![6, 2, 0, 0xff, 0xfe];
        assert_eq!(Message::decode(&bytes), Err(CodecError::InvalidName));
    }

    #[test]
    fn ok_name_longer_than_u16_cannot_be_encoded() {
        let msg = Message::Ok {
            name: "x".repeat(u16::MAX as usize + 1),
        };
        assert!(matches!(msg.encode(), Err(CodecError::NameTooLong(_))));
    }
}
