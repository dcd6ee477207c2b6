//! Atomic procedures executed inside the store.
//!
//! Redis runs each script single-threaded, which is what makes every
//! read-modify-write here indivisible with respect to concurrent
//! invocations on the same key. Scripts read the server clock (`TIME`)
//! rather than a caller-supplied timestamp so every process shares one
//! time base.
//!
//! All durations cross the wire in milliseconds; results are integers or
//! integer arrays.

/// Token-bucket consume.
///
/// `KEYS[1]` — bucket hash (`tokens`, `ts`).
/// `ARGV` — capacity, refill_tokens, refill_period_ms, requested.
///
/// Returns `{allowed, remaining, wait_ms}`. Refill advances `ts` by whole
/// periods only, preserving fractional progress toward the next token; a
/// denied call still persists the refill. The bucket expires once it has
/// been idle long enough to refill completely.
pub(crate) const RATE_LIMIT_CONSUME: &str = r#"
local capacity = tonumber(ARGV[1])
local refill_tokens = tonumber(ARGV[2])
local refill_period_ms = tonumber(ARGV[3])
local requested = tonumber(ARGV[4])

local time = redis.call('TIME')
local now_ms = time[1] * 1000 + math.floor(time[2] / 1000)

local state = redis.call('HMGET', KEYS[1], 'tokens', 'ts')
local tokens = tonumber(state[1])
local ts = tonumber(state[2])
if tokens == nil or ts == nil then
  tokens = capacity
  ts = now_ms
end

local elapsed = now_ms - ts
if elapsed >= refill_period_ms then
  local periods = math.floor(elapsed / refill_period_ms)
  tokens = math.min(capacity, tokens + periods * refill_tokens)
  ts = ts + periods * refill_period_ms
end

local allowed = 0
local wait_ms = 0
if tokens >= requested then
  tokens = tokens - requested
  allowed = 1
else
  local deficit = requested - tokens
  local periods_needed = math.ceil(deficit / refill_tokens)
  wait_ms = periods_needed * refill_period_ms - (now_ms - ts)
end

redis.call('HSET', KEYS[1], 'tokens', tokens, 'ts', ts)
local idle_periods = math.ceil(capacity / refill_tokens) + 1
redis.call('PEXPIRE', KEYS[1], idle_periods * refill_period_ms)

return {allowed, tokens, wait_ms}
"#;

/// Token-bucket refund.
///
/// `KEYS[1]` — bucket hash. `ARGV` — capacity, amount.
///
/// Credits unused tokens back, never past capacity; an absent bucket
/// credits nothing. Returns the number actually credited.
pub(crate) const RATE_LIMIT_REFUND: &str = r#"
local capacity = tonumber(ARGV[1])
local amount = tonumber(ARGV[2])

local tokens = tonumber(redis.call('HGET', KEYS[1], 'tokens'))
if tokens == nil then
  return 0
end

local credited = math.min(capacity - tokens, amount)
if credited > 0 then
  redis.call('HSET', KEYS[1], 'tokens', tokens + credited)
end
return credited
"#;

/// Idempotency acquire: create a PENDING record iff none exists.
///
/// `KEYS[1]` — record hash. `ARGV` — ttl_ms.
///
/// Returns 1 when this caller acquired the key, 0 when any record
/// (PENDING or SUCCESS) already exists.
pub(crate) const IDEM_ACQUIRE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
  return 0
end
redis.call('HSET', KEYS[1], 'status', 'PENDING')
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[1]))
return 1
"#;

/// Idempotency save-success: rewrite the record as SUCCESS with the
/// cached payload and a fresh TTL.
///
/// `KEYS[1]` — record hash. `ARGV` — ttl_ms, payload_type, payload.
///
/// The record is rewritten from scratch so no stale fields survive.
pub(crate) const IDEM_SUCCESS: &str = r#"
redis.call('DEL', KEYS[1])
redis.call('HSET', KEYS[1], 'status', 'SUCCESS')
if ARGV[2] ~= '' then
  redis.call('HSET', KEYS[1], 'type', ARGV[2])
end
if ARGV[3] ~= '' then
  redis.call('HSET', KEYS[1], 'body', ARGV[3])
end
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[1]))
return 1
"#;

/// Idempotency status touch: overwrite the status and refresh the TTL in
/// one step, keeping long-running PENDING markers alive.
///
/// `KEYS[1]` — record hash. `ARGV` — ttl_ms, status.
pub(crate) const IDEM_TOUCH: &str = r#"
redis.call('HSET', KEYS[1], 'status', ARGV[2])
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[1]))
return 1
"#;

/// Attempt-limit window, lock, and strike accounting.
///
/// `KEYS` — failure window counter, lock flag, strike counter (one key
/// family derived from the same logical key).
/// `ARGV` — window_ms, max, lock_ms, escalate_csv (`strikes=lock_ms`
/// pairs, ascending), is_success, strike_inc, peek_only.
///
/// Returns `{allowed, attempts_ttl_ms, lock_ttl_ms}`. A success clears
/// the window and lock but not the strikes, so repeat offenders keep
/// escalating; strike memory itself decays after a few quiet lock cycles.
pub(crate) const ATTEMPT_LIMIT: &str = r#"
local window_ms = tonumber(ARGV[1])
local max = tonumber(ARGV[2])
local lock_ms = tonumber(ARGV[3])
local escalate = ARGV[4]
local is_success = tonumber(ARGV[5]) == 1
local strike_inc = tonumber(ARGV[6])
local peek_only = tonumber(ARGV[7]) == 1

if is_success then
  redis.call('DEL', KEYS[1], KEYS[2])
  return {1, 0, 0}
end

local lock_ttl = redis.call('PTTL', KEYS[2])
if lock_ttl > 0 then
  return {0, 0, lock_ttl}
end

local count = tonumber(redis.call('GET', KEYS[1])) or 0
if not peek_only then
  count = redis.call('INCR', KEYS[1])
  if count == 1 then
    redis.call('PEXPIRE', KEYS[1], window_ms)
  end
end

if count < max then
  local attempts_ttl = redis.call('PTTL', KEYS[1])
  if attempts_ttl < 0 then
    attempts_ttl = 0
  end
  return {1, attempts_ttl, 0}
end

local strikes = redis.call('INCRBY', KEYS[3], strike_inc)
local lock_for = lock_ms
for pair in string.gmatch(escalate, '([^,]+)') do
  local at, dur = string.match(pair, '(%d+)=(%d+)')
  if at ~= nil and strikes >= tonumber(at) then
    lock_for = tonumber(dur)
  end
end

redis.call('SET', KEYS[2], '1', 'PX', lock_for)
redis.call('PEXPIRE', KEYS[3], (lock_for + window_ms) * 4)
redis.call('DEL', KEYS[1])
return {0, 0, lock_for}
"#;
